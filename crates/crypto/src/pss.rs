//! RSA-PSS (SHA-256, MGF1-SHA-256) signature verification
//!
//! The issuing backend signs with the maximum salt length its key allows,
//! but the salt length travels nowhere in the credential. Verification
//! therefore tries the maximum salt first and the digest-length salt second.

use crate::keys::VerifyingKey;
use rsa::Pss;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// SHA-256 output size
pub const DIGEST_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Signature is empty")]
    Empty,

    #[error("Signature is {got} bytes, key modulus is {expected}")]
    LengthMismatch { expected: usize, got: usize },

    #[error("RSA-PSS signature does not verify")]
    Invalid,
}

/// Salt length that made a signature verify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaltLength {
    /// `emLen - hLen - 2`
    Maximum(usize),
    /// Equal to the digest size
    Digest,
}

/// Largest salt a PSS encoding under this key can carry
pub fn max_salt_len(key_bits: usize) -> usize {
    let em_len = key_bits.saturating_sub(1).div_ceil(8);
    em_len.saturating_sub(DIGEST_LEN + 2)
}

/// Verify `signature` over `message` with the supported salt strategies
pub fn verify_pss_sha256(
    key: &VerifyingKey,
    message: &[u8],
    signature: &[u8],
) -> Result<SaltLength, SignatureError> {
    if signature.is_empty() {
        return Err(SignatureError::Empty);
    }
    let modulus_len = key.bits().div_ceil(8);
    if signature.len() != modulus_len {
        return Err(SignatureError::LengthMismatch {
            expected: modulus_len,
            got: signature.len(),
        });
    }

    let hashed = Sha256::digest(message);
    let max_salt = max_salt_len(key.bits());

    let candidates = [
        (SaltLength::Maximum(max_salt), max_salt),
        (SaltLength::Digest, DIGEST_LEN),
    ];
    for (label, salt_len) in candidates {
        let scheme = Pss::new_with_salt::<Sha256>(salt_len);
        if key.key().verify(scheme, &hashed, signature).is_ok() {
            return Ok(label);
        }
    }
    Err(SignatureError::Invalid)
}
