//! Common test utilities for cardtrust integration tests
//!
//! Signing lives here only: the library itself never holds a private key.

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use cardtrust::crypto::rsa::pkcs8::{EncodePublicKey, LineEnding};
use cardtrust::crypto::rsa::{Pss, RsaPrivateKey, RsaPublicKey};
use cardtrust::crypto::{max_salt_len, VerifyingKey};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

/// 7-byte UID of a typical NTAG215
pub const TEST_UID: [u8; 7] = [0x04, 0xA2, 0x19, 0x6B, 0x7C, 0x55, 0x80];

/// Structurally valid compact payload, good until the end of 2099
pub const CLEAR_COMPACT: &str =
    r#"{"v":1,"mid":"M-42","name":"Grace","exp":"20991231","sig":"AAECAwQFBgcICQoLDA0ODw=="}"#;

struct Issuer {
    private_key: RsaPrivateKey,
    pem: String,
    key: VerifyingKey,
}

fn issuer() -> &'static Issuer {
    static ISSUER: OnceLock<Issuer> = OnceLock::new();
    ISSUER.get_or_init(|| {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pem = RsaPublicKey::from(&private_key)
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        let key = VerifyingKey::from_pem(&pem).unwrap();
        Issuer {
            private_key,
            pem,
            key,
        }
    })
}

/// PEM of the test issuer's public key
pub fn issuer_pem() -> &'static str {
    &issuer().pem
}

pub fn issuer_key_id() -> &'static str {
    issuer().key.fingerprint()
}

/// RSA-PSS/SHA-256 signature with the maximum salt length
pub fn sign(message: &[u8]) -> Vec<u8> {
    let issuer = issuer();
    let hashed = Sha256::digest(message);
    issuer
        .private_key
        .sign_with_rng(
            &mut rand::thread_rng(),
            Pss::new_with_salt::<Sha256>(max_salt_len(issuer.key.bits())),
            &hashed,
        )
        .unwrap()
}

pub fn member_payload(member_id: &str, expires_at: &str) -> Value {
    json!({
        "member_id": member_id,
        "membership_id": format!("MB-{}", member_id),
        "name": "Grace Hopper",
        "status": "active",
        "issued_at": "2026-01-01T00:00:00",
        "expires_at": expires_at
    })
}

/// `payload|signature|metadata`, all parts base64
pub fn standard_credential(payload: &Value) -> String {
    let payload = serde_json::to_vec(payload).unwrap();
    let signature = sign(&payload);
    let metadata = json!({
        "version": "1.0",
        "algorithm": "RSA-PSS-SHA256",
        "key_id": issuer_key_id()
    });
    format!(
        "{}|{}|{}",
        BASE64.encode(&payload),
        BASE64.encode(signature),
        BASE64.encode(serde_json::to_vec(&metadata).unwrap())
    )
}

/// Swap one character of the payload part for another base64 character
pub fn tamper(credential: &str) -> String {
    let mut chars: Vec<char> = credential.chars().collect();
    chars[10] = if chars[10] == 'A' { 'B' } else { 'A' };
    chars.into_iter().collect()
}
