//! RSA public key parsing and fingerprinting
//!
//! Keys arrive as PEM text from several places (remote key endpoint, a
//! bundled file, a cache file, configuration). Both the SubjectPublicKeyInfo
//! form (`BEGIN PUBLIC KEY`) and the PKCS#1 form (`BEGIN RSA PUBLIC KEY`) are
//! accepted.

use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of hex characters kept from the SPKI digest
pub const FINGERPRINT_HEX_LEN: usize = 16;

/// Errors raised while turning PEM text into a usable key
#[derive(Debug, Error)]
pub enum PublicKeyError {
    #[error("PEM input is empty")]
    Empty,

    #[error("Not an RSA public key: {0}")]
    InvalidPem(String),

    #[error("Failed to encode key as SubjectPublicKeyInfo: {0}")]
    Encoding(String),
}

/// A parsed RSA verification key together with its fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyingKey {
    key: RsaPublicKey,
    fingerprint: String,
}

impl VerifyingKey {
    /// Parse PEM text (SPKI first, then PKCS#1)
    pub fn from_pem(pem: &str) -> Result<Self, PublicKeyError> {
        let key = parse_rsa_public_key_pem(pem)?;
        let fingerprint = key_fingerprint(&key)?;
        Ok(Self { key, fingerprint })
    }

    pub fn key(&self) -> &RsaPublicKey {
        &self.key
    }

    /// First 16 lowercase hex characters of SHA-256 over the SPKI DER
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Modulus size in bits
    pub fn bits(&self) -> usize {
        self.key.n().bits()
    }
}

/// Parse and validate a PEM-encoded RSA public key
pub fn parse_rsa_public_key_pem(pem: &str) -> Result<RsaPublicKey, PublicKeyError> {
    let pem = normalize_pem(pem);
    if pem.is_empty() {
        return Err(PublicKeyError::Empty);
    }

    match RsaPublicKey::from_public_key_pem(&pem) {
        Ok(key) => Ok(key),
        Err(spki_err) => RsaPublicKey::from_pkcs1_pem(&pem).map_err(|pkcs1_err| {
            PublicKeyError::InvalidPem(format!("SPKI: {}; PKCS#1: {}", spki_err, pkcs1_err))
        }),
    }
}

/// Key id as published in credential metadata
pub fn key_fingerprint(key: &RsaPublicKey) -> Result<String, PublicKeyError> {
    let der = key
        .to_public_key_der()
        .map_err(|e| PublicKeyError::Encoding(e.to_string()))?;
    let digest = Sha256::digest(der.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_HEX_LEN);
    Ok(hex)
}

// JSON transports and env files sometimes carry the PEM with literal `\n`.
fn normalize_pem(pem: &str) -> String {
    pem.trim().replace("\\n", "\n").replace("\r\n", "\n")
}
