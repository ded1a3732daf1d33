//! Remote collaborators: authoritative verification and key distribution
//!
//! The orchestrator and the trust-key resolver only see the traits in this
//! module. [`HttpBackend`] implements both over HTTP when the `http` feature
//! is enabled; tests substitute in-memory implementations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const VERIFY_PATH: &str = "api/qr/verify";
pub const PUBLIC_KEY_PATH: &str = "api/qr/public-key";

/// Failures talking to a remote collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Backend refused the request: {0}")]
    Refused(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl BackendError {
    /// Server errors, timeouts and connection failures may succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http { status, .. } if (500..600).contains(status))
            || matches!(self, Self::Timeout(_) | Self::Connection(_))
    }

    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Timeout(_) => Some("Check network connectivity or increase the timeout"),
            Self::Connection(_) => Some("Check that the backend base URL is reachable"),
            Self::InvalidResponse(_) => Some("Verify backend version compatibility"),
            Self::InvalidUrl(_) => Some("Check the backend base URL configuration"),
            _ => None,
        }
    }
}

/// Member record as reported by the remote verifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMember {
    #[serde(default)]
    pub member_id: Option<String>,
    #[serde(default)]
    pub membership_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Authoritative answer for one credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteVerdict {
    pub valid: bool,
    pub error: Option<String>,
    pub member: Option<RemoteMember>,
}

#[derive(Debug, Serialize)]
pub struct VerifyRequest<'a> {
    pub qr_code: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub member_data: Option<RemoteMember>,
}

impl VerifyResponse {
    /// `success == false` means the backend did not process the request
    pub fn into_verdict(self) -> Result<RemoteVerdict, BackendError> {
        if !self.success {
            return Err(BackendError::Refused(
                self.error
                    .unwrap_or_else(|| "verification failed".to_string()),
            ));
        }
        Ok(RemoteVerdict {
            valid: self.valid,
            error: self.error,
            member: self.member_data,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct PublicKeyResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub public_key: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub key_format: Option<String>,
}

impl PublicKeyResponse {
    pub fn into_pem(self) -> Result<String, BackendError> {
        let present = self.public_key.is_some();
        match self.public_key {
            Some(pem) if self.success && !pem.trim().is_empty() => Ok(pem),
            _ => Err(BackendError::InvalidResponse(format!(
                "success={}, public_key present={}",
                self.success, present
            ))),
        }
    }
}

/// Authoritative remote verification
#[async_trait]
pub trait RemoteVerifier: Send + Sync {
    /// Submit the raw captured text, exactly as read
    async fn verify(&self, credential_text: &str) -> Result<RemoteVerdict, BackendError>;
}

/// Source of the current trust public key
#[async_trait]
pub trait KeyDistribution: Send + Sync {
    /// Fetch the PEM-encoded key, giving up after `timeout`
    async fn fetch_public_key(&self, timeout: Duration) -> Result<String, BackendError>;
}

/// Decides between the online and offline path
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Connectivity flag flipped by the host application
#[derive(Debug)]
pub struct ConnectivityFlag(AtomicBool);

impl ConnectivityFlag {
    pub fn new(online: bool) -> Self {
        Self(AtomicBool::new(online))
    }

    pub fn set_online(&self, online: bool) {
        self.0.store(online, Ordering::Relaxed);
    }
}

impl Connectivity for ConnectivityFlag {
    fn is_online(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(feature = "http")]
pub use http::HttpBackend;

#[cfg(feature = "http")]
mod http {
    use super::*;
    use crate::config::VerifierConfig;
    use reqwest::Client;
    use tracing::{debug, warn};
    use url::Url;

    /// HTTP client for both remote collaborators
    #[derive(Debug, Clone)]
    pub struct HttpBackend {
        client: Client,
        request_timeout: Duration,
        verify_url: Url,
        public_key_url: Url,
    }

    impl HttpBackend {
        pub fn new(config: &VerifierConfig) -> Result<Self, BackendError> {
            let client = Client::builder()
                .timeout(config.request_timeout)
                .build()
                .map_err(|e| BackendError::Connection(e.to_string()))?;
            let join = |path: &str| {
                config
                    .endpoint(path)
                    .map_err(|e| BackendError::InvalidUrl(e.to_string()))
            };

            Ok(Self {
                client,
                request_timeout: config.request_timeout,
                verify_url: join(VERIFY_PATH)?,
                public_key_url: join(PUBLIC_KEY_PATH)?,
            })
        }

        async fn check_status(
            response: reqwest::Response,
        ) -> Result<reqwest::Response, BackendError> {
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "backend returned an error status");
            Err(BackendError::Http {
                status: status.as_u16(),
                body,
            })
        }
    }

    fn map_reqwest(err: reqwest::Error, timeout: Duration) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(timeout)
        } else if err.is_decode() {
            BackendError::InvalidResponse(err.to_string())
        } else {
            BackendError::Connection(err.to_string())
        }
    }

    #[async_trait]
    impl RemoteVerifier for HttpBackend {
        async fn verify(&self, credential_text: &str) -> Result<RemoteVerdict, BackendError> {
            debug!(url = %self.verify_url, "submitting credential for remote verification");
            let response = self
                .client
                .post(self.verify_url.clone())
                .json(&VerifyRequest {
                    qr_code: credential_text,
                })
                .send()
                .await
                .map_err(|e| map_reqwest(e, self.request_timeout))?;

            let body: VerifyResponse = Self::check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| map_reqwest(e, self.request_timeout))?;
            body.into_verdict()
        }
    }

    #[async_trait]
    impl KeyDistribution for HttpBackend {
        async fn fetch_public_key(&self, timeout: Duration) -> Result<String, BackendError> {
            debug!(url = %self.public_key_url, ?timeout, "fetching trust public key");
            let response = self
                .client
                .get(self.public_key_url.clone())
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| map_reqwest(e, timeout))?;

            let body: PublicKeyResponse = Self::check_status(response)
                .await?
                .json()
                .await
                .map_err(|e| map_reqwest(e, timeout))?;
            body.into_pem()
        }
    }
}
