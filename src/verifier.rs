//! Offline credential verification
//!
//! Two independent schemes, selected by envelope variant:
//!
//! - **Standard** credentials carry an RSA-PSS/SHA-256 signature over the
//!   JSON payload. A verified credential has [`TrustLevel::Cryptographic`].
//! - **Compact** credentials are masked JSON on small tags. Their `sig`
//!   field is only checked for shape, so the best they can reach is
//!   [`TrustLevel::Structural`].
//!
//! Expiry never turns into a rejection: an authentic but stale credential is
//! returned with `valid == false` and [`RejectionReason::Expired`].

use crate::credential::{
    CredentialFields, RejectionReason, TrustLevel, VerificationMode, VerifiedCredential,
};
use crate::normalizer::{decode_base64_lenient, CompactPayload, StandardEnvelope};
use cardtrust_crypto::{apply_mask, verify_pss_sha256, MaskKey, VerifyingKey};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

/// Algorithm id carried in standard credential metadata
pub const STANDARD_ALGORITHM: &str = "RSA-PSS-SHA256";

/// The only compact format version understood
pub const COMPACT_VERSION: u64 = 1;

/// Minimum decoded size of a compact `sig` field
pub const COMPACT_MIN_SIG_BYTES: usize = 16;

const STANDARD_REQUIRED: [&str; 2] = ["member_id", "expires_at"];
const COMPACT_REQUIRED: [&str; 5] = ["v", "mid", "name", "exp", "sig"];

/// Verification failures that are not a verdict on the credential itself
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{0}")]
    Rejected(#[from] RejectionReason),

    #[error("compact payload is masked and no mask key is configured")]
    MaskKeyUnavailable,
}

/// Metadata attached to standard credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StandardMetadata {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub key_id: Option<String>,
}

impl StandardMetadata {
    /// Decode the raw third part; unreadable metadata is treated as absent
    pub fn parse(raw: &str) -> Option<Self> {
        let bytes = decode_base64_lenient(raw)?;
        serde_json::from_slice(&bytes).ok()
    }
}

#[derive(Debug, Deserialize)]
struct StandardPayload {
    #[serde(deserialize_with = "string_or_number")]
    member_id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    membership_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct CompactClaims {
    #[serde(deserialize_with = "string_or_number")]
    mid: String,
    name: String,
    exp: String,
    sig: String,
}

/// Offline verifier for both credential schemes
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    mask_key: Option<MaskKey>,
}

impl SignatureVerifier {
    pub fn new(mask_key: Option<MaskKey>) -> Self {
        Self { mask_key }
    }

    pub fn has_mask_key(&self) -> bool {
        self.mask_key.is_some()
    }

    /// Verify a standard credential against `key`
    pub fn verify_standard(
        &self,
        envelope: &StandardEnvelope,
        key: &VerifyingKey,
        now: DateTime<Utc>,
    ) -> Result<VerifiedCredential, RejectionReason> {
        if let Some(metadata) = StandardMetadata::parse(&envelope.metadata) {
            check_metadata(&metadata, key)?;
        } else {
            debug!("standard credential metadata unreadable, skipping metadata checks");
        }

        let salt = verify_pss_sha256(key, &envelope.payload, &envelope.signature).map_err(|e| {
            warn!(error = %e, key_id = key.fingerprint(), "signature rejected");
            RejectionReason::BadSignature
        })?;
        debug!(?salt, key_id = key.fingerprint(), "signature verified");

        let map = json_object(&envelope.payload)?;
        require_fields(&map, &STANDARD_REQUIRED)?;
        let payload: StandardPayload = serde_json::from_value(Value::Object(map))
            .map_err(|_| RejectionReason::MalformedPayload)?;
        let expires_at =
            parse_expiry(&payload.expires_at).ok_or(RejectionReason::MalformedPayload)?;

        let fields = CredentialFields {
            member_id: payload.member_id,
            membership_id: payload.membership_id,
            name: payload.name.unwrap_or_default(),
            status: payload.status,
            valid_until: Some(expires_at),
        };
        let reason = (now > expires_at).then_some(RejectionReason::Expired);
        Ok(VerifiedCredential::new(
            fields,
            VerificationMode::Offline,
            TrustLevel::Cryptographic,
            reason,
        ))
    }

    /// Structurally verify a compact credential
    ///
    /// The mask is a fixed-key XOR and `sig` is never checked against any
    /// key. A credential that passes is plausible, not proven.
    pub fn verify_compact(
        &self,
        payload: &CompactPayload,
        now: DateTime<Utc>,
    ) -> Result<VerifiedCredential, VerifyError> {
        let clear = match payload {
            CompactPayload::Clear(bytes) => bytes.clone(),
            CompactPayload::Masked(bytes) => {
                let key = self
                    .mask_key
                    .as_ref()
                    .ok_or(VerifyError::MaskKeyUnavailable)?;
                apply_mask(bytes, key)
            }
        };

        let map = json_object(&clear)?;
        require_fields(&map, &COMPACT_REQUIRED)?;
        if !is_supported_version(&map["v"]) {
            return Err(RejectionReason::UnsupportedVersion.into());
        }
        let claims: CompactClaims = serde_json::from_value(Value::Object(map))
            .map_err(|_| RejectionReason::MalformedPayload)?;

        let exp = parse_compact_date(&claims.exp).ok_or(RejectionReason::MalformedPayload)?;
        // Expiry is decided before the signature shape
        let reason = (now.date_naive() > exp).then_some(RejectionReason::Expired);
        if reason.is_none() && !sig_is_plausible(&claims.sig) {
            return Err(RejectionReason::BadSignature.into());
        }
        let fields = CredentialFields {
            member_id: claims.mid,
            membership_id: None,
            name: claims.name,
            status: None,
            valid_until: Some(exp.and_time(end_of_day()).and_utc()),
        };
        Ok(VerifiedCredential::new(
            fields,
            VerificationMode::Offline,
            TrustLevel::Structural,
            reason,
        ))
    }
}

fn check_metadata(metadata: &StandardMetadata, key: &VerifyingKey) -> Result<(), RejectionReason> {
    if let Some(algorithm) = &metadata.algorithm {
        if algorithm != STANDARD_ALGORITHM {
            warn!(%algorithm, "unsupported signature algorithm");
            return Err(RejectionReason::UnsupportedVersion);
        }
    }
    if let Some(key_id) = &metadata.key_id {
        if !key_id.eq_ignore_ascii_case(key.fingerprint()) {
            warn!(%key_id, expected = key.fingerprint(), "credential signed by another key");
            return Err(RejectionReason::KeyMismatch);
        }
    }
    Ok(())
}

fn json_object(bytes: &[u8]) -> Result<Map<String, Value>, RejectionReason> {
    match serde_json::from_slice(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(RejectionReason::MalformedPayload),
    }
}

fn require_fields(map: &Map<String, Value>, fields: &[&str]) -> Result<(), RejectionReason> {
    for field in fields {
        match map.get(*field) {
            None | Some(Value::Null) => return Err(RejectionReason::MissingField),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(RejectionReason::MissingField)
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_supported_version(v: &Value) -> bool {
    match v {
        Value::Number(n) => n.as_u64() == Some(COMPACT_VERSION),
        Value::String(s) => s.trim().parse::<u64>().ok() == Some(COMPACT_VERSION),
        _ => false,
    }
}

fn sig_is_plausible(sig: &str) -> bool {
    decode_base64_lenient(sig).is_some_and(|bytes| bytes.len() >= COMPACT_MIN_SIG_BYTES)
}

fn end_of_day() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default()
}

/// `YYYYMMDD`, exactly eight digits
fn parse_compact_date(exp: &str) -> Option<NaiveDate> {
    let exp = exp.trim();
    if exp.len() != 8 || !exp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(exp, "%Y%m%d").ok()
}

/// RFC 3339, or naive ISO-8601 taken as UTC, or a bare date (end of day)
pub(crate) fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(end_of_day()).and_utc())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}
