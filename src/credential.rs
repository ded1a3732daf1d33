//! Verification results crossing out of the pipeline
//!
//! A [`VerifiedCredential`] is only ever built inside this crate (by the
//! verifier or by the orchestrator from a remote verdict). Callers read it
//! through accessors; nothing mutates it after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Where the verdict came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    Online,
    Offline,
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationMode::Online => write!(f, "online"),
            VerificationMode::Offline => write!(f, "offline"),
        }
    }
}

/// How much the verdict actually proves
///
/// `Structural` means the credential has the right shape and has not
/// expired, but nothing about it was cryptographically checked. Compact tag
/// payloads can never reach a higher level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// The issuing backend vouched for the credential
    Authority,
    /// RSA-PSS signature verified against a trusted key
    Cryptographic,
    /// Format and expiry plausible, no cryptographic proof
    Structural,
}

impl TrustLevel {
    pub fn is_proven(&self) -> bool {
        !matches!(self, TrustLevel::Structural)
    }
}

/// Why a credential was refused (or, for `Expired`, marked invalid)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("signature does not verify")]
    BadSignature,

    #[error("credential has expired")]
    Expired,

    #[error("credential payload is malformed")]
    MalformedPayload,

    #[error("unsupported credential version or algorithm")]
    UnsupportedVersion,

    #[error("credential is missing a required field")]
    MissingField,

    #[error("credential was signed by a different key")]
    KeyMismatch,

    #[error("remote verification rejected the credential")]
    RemoteRejected,
}

/// A credential that went through verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedCredential {
    member_id: String,
    membership_id: Option<String>,
    name: String,
    status: Option<String>,
    valid_until: Option<DateTime<Utc>>,
    verification_mode: VerificationMode,
    trust_level: TrustLevel,
    valid: bool,
    reason: Option<RejectionReason>,
}

/// Credential fields as read from a payload, before a verdict is attached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CredentialFields {
    pub member_id: String,
    pub membership_id: Option<String>,
    pub name: String,
    pub status: Option<String>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl VerifiedCredential {
    /// Attach a verdict to parsed fields. `reason` set means `valid == false`.
    pub(crate) fn new(
        fields: CredentialFields,
        verification_mode: VerificationMode,
        trust_level: TrustLevel,
        reason: Option<RejectionReason>,
    ) -> Self {
        Self {
            member_id: fields.member_id,
            membership_id: fields.membership_id,
            name: fields.name,
            status: fields.status,
            valid_until: fields.valid_until,
            verification_mode,
            trust_level,
            valid: reason.is_none(),
            reason,
        }
    }

    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    pub fn membership_id(&self) -> Option<&str> {
        self.membership_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.valid_until
    }

    pub fn verification_mode(&self) -> VerificationMode {
        self.verification_mode
    }

    pub fn trust_level(&self) -> TrustLevel {
        self.trust_level
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn reason(&self) -> Option<RejectionReason> {
        self.reason
    }
}
