//! Unified error type for the cardtrust public API
//!
//! Internal modules keep their own error enums for precise handling; this
//! type gathers them for callers that only want one `Result` type.
//!
//! # Example
//!
//! ```no_run
//! use cardtrust::CardTrustError;
//! use cardtrust::transport::MemoryTag;
//! use cardtrust::tag::TagPageCodec;
//!
//! fn write_badge(tag: &mut MemoryTag) -> Result<usize, CardTrustError> {
//!     Ok(TagPageCodec::new(tag).write_text("hello", "en")?)
//! }
//! ```

use thiserror::Error;

/// Unified error type for all cardtrust operations
///
/// Verification outcomes are not errors: rejected, unreadable and
/// unverifiable credentials come back as a
/// [`Verdict`](crate::orchestrator::Verdict). The variants here cover the
/// operations around it.
///
/// # Error Categories
///
/// - **Transport**: the tag or reader did not answer as expected
/// - **Tag**: multi-page operations, including NDEF encoding and capacity
/// - **Rejected**: a credential was checked and refused
/// - **Trust**: no trust key could be resolved
/// - **Backend**: remote collaborators
/// - **Config**: configuration loading
/// - **Key**: key material parsing
#[derive(Debug, Error)]
pub enum CardTrustError {
    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Tag error: {0}")]
    Tag(#[from] crate::tag::TagError),

    #[error("NDEF error: {0}")]
    Ndef(#[from] cardtrust_protocol::NdefError),

    #[error("Credential rejected: {0}")]
    Rejected(#[from] crate::credential::RejectionReason),

    #[error("Credential text rejected: {0}")]
    Normalization(#[from] crate::normalizer::NormalizationRejection),

    #[error("Trust key error: {0}")]
    Trust(#[from] crate::trust::TrustError),

    #[error("Backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Public key error: {0}")]
    Key(#[from] cardtrust_crypto::PublicKeyError),

    #[error("Mask key error: {0}")]
    MaskKey(#[from] cardtrust_crypto::KeyError),
}

impl CardTrustError {
    /// Returns true if the error is potentially retryable
    ///
    /// Tag transport problems are fixed by re-presenting the card; backend
    /// timeouts and server errors may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::Tag(e) => e.is_retryable(),
            Self::Backend(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns a suggestion for resolving this error
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Transport(e) => e.suggestion(),
            Self::Backend(e) => e.suggestion(),
            Self::Config(e) => e.suggestion(),
            Self::Tag(crate::tag::TagError::Capacity { .. }) => {
                Some("Shorten the text or use a tag with a larger data area")
            }
            Self::Trust(_) => Some("Configure a bundled key file or restore backend connectivity"),
            _ => None,
        }
    }

    /// Returns true if this is a tag or reader error
    pub fn is_tag_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Tag(_) | Self::Ndef(_))
    }

    /// Returns true if a credential was checked or parsed and refused
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Normalization(_))
    }

    /// Returns true if key material was missing or unusable
    pub fn is_key_error(&self) -> bool {
        matches!(self, Self::Trust(_) | Self::Key(_) | Self::MaskKey(_))
    }

    /// Returns true if a remote collaborator failed
    pub fn is_backend_error(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::credential::RejectionReason;
    use crate::tag::TagError;
    use crate::transport::TransportError;

    #[test]
    fn test_error_categories() {
        let transport = CardTrustError::from(TransportError::NotPresent);
        assert!(transport.is_tag_error());
        assert!(transport.is_retryable());
        assert!(!transport.is_credential_error());

        let capacity = CardTrustError::from(TagError::Capacity {
            needed: 600,
            available: 504,
        });
        assert!(capacity.is_tag_error());
        assert!(!capacity.is_retryable());
        assert!(capacity.suggestion().is_some());

        let rejected = CardTrustError::from(RejectionReason::BadSignature);
        assert!(rejected.is_credential_error());
        assert!(!rejected.is_key_error());

        let trust = CardTrustError::from(crate::trust::TrustError::Exhausted { tried: 5 });
        assert!(trust.is_key_error());
        assert!(!trust.is_retryable());
    }

    #[test]
    fn test_backend_retryable() {
        let err = CardTrustError::from(BackendError::Http {
            status: 503,
            body: "maintenance".into(),
        });
        assert!(err.is_backend_error());
        assert!(err.is_retryable());
        assert!(!CardTrustError::from(BackendError::Refused("no".into())).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = CardTrustError::from(RejectionReason::Expired);
        assert_eq!(err.to_string(), "Credential rejected: credential has expired");
    }
}
