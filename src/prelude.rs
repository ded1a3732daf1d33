//! cardtrust Prelude
//!
//! Commonly used types for wiring a reader to the verification pipeline.
//!
//! # Example
//!
//! ```rust
//! use cardtrust::prelude::*;
//!
//! # async fn example() {
//! let config = VerifierConfig::default();
//! let resolver = std::sync::Arc::new(TrustKeyResolver::new(&config, None));
//! let orchestrator = VerificationOrchestrator::new(&config, resolver);
//!
//! let reader = shared_transport(MemoryTag::blank(vec![0x04, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66]));
//! let mut session = TagSession::open(&reader).await;
//! let verdict = orchestrator
//!     .verify_tag(&mut session, &CancellationToken::new())
//!     .await;
//! assert!(!verdict.is_accepted());
//! # }
//! ```

// Pipeline
pub use crate::config::VerifierConfig;
pub use crate::error::CardTrustError;
pub use crate::orchestrator::{
    CapturedTag, Outcome, TextSource, Verdict, VerificationOrchestrator, VerificationState,
};
pub use crate::trust::{KeySource, TrustKeyMaterial, TrustKeyResolver};

// Credentials
pub use crate::credential::{RejectionReason, TrustLevel, VerificationMode, VerifiedCredential};
pub use crate::normalizer::{normalize, CredentialEnvelope, NormalizationRejection};
pub use crate::verifier::SignatureVerifier;

// Tags
pub use crate::presence::{spawn_presence_monitor, CardEvent};
pub use crate::tag::{shared_transport, SharedTransport, TagPageCodec, TagSession};
pub use crate::transport::{ApduPageTransport, CardChannel, MemoryTag, PageTransport, TransportError};
pub use cardtrust_protocol::{decode_text_from_bytes, encode_text_tlv, TextRecord};

// Collaborators
pub use crate::backend::{Connectivity, ConnectivityFlag, KeyDistribution, RemoteVerifier};

#[cfg(feature = "http")]
pub use crate::backend::HttpBackend;

pub use tokio_util::sync::CancellationToken;
