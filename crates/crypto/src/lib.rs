//! cardtrust Cryptographic Operations
//!
//! This crate holds everything that touches key material:
//! - RSA public key parsing (SPKI and PKCS#1 PEM) and key-id fingerprints
//! - RSA-PSS / SHA-256 verification with salt-length recovery
//! - The repeating-key mask used by compact tag payloads
//!
//! # Security Notes
//!
//! - **Zeroization**: the mask key is cleared from memory on drop
//! - **Verification only**: no private key operations live here
//! - **Mask is not encryption**: compact payloads only get structural trust
//!
//! # Example
//!
//! ```no_run
//! use cardtrust_crypto::{verify_pss_sha256, VerifyingKey};
//!
//! # fn example(pem: &str, payload: &[u8], sig: &[u8]) -> Result<(), Box<dyn std::error::Error>> {
//! let key = VerifyingKey::from_pem(pem)?;
//! println!("key id {}", key.fingerprint());
//! verify_pss_sha256(&key, payload, sig)?;
//! # Ok(())
//! # }
//! ```

pub mod keys;
pub mod mask;
pub mod pss;
pub mod types;

// Re-export commonly used types
pub use keys::{key_fingerprint, parse_rsa_public_key_pem, PublicKeyError, VerifyingKey};
pub use mask::apply_mask;
pub use pss::{max_salt_len, verify_pss_sha256, SaltLength, SignatureError};
pub use types::{KeyError, MaskKey};

// Re-export the rsa crate so callers (and fixtures) use the same version
pub use rsa;
