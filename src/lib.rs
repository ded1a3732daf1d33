pub mod backend;
pub mod config;
mod credential;
mod error;
pub mod normalizer;
pub mod orchestrator;
pub mod prelude;
pub mod presence;
pub mod tag;
pub mod transport;
pub mod trust;
pub mod verifier;

pub use config::{ConfigError, VerifierConfig};
pub use credential::{RejectionReason, TrustLevel, VerificationMode, VerifiedCredential};
pub use error::CardTrustError;
pub use normalizer::{normalize, CredentialEnvelope, NormalizationRejection};
pub use orchestrator::{CapturedTag, Outcome, Verdict, VerificationOrchestrator};
pub use trust::{TrustKeyMaterial, TrustKeyResolver};
pub use verifier::SignatureVerifier;

pub use cardtrust_crypto as crypto;
pub use cardtrust_protocol as protocol;
