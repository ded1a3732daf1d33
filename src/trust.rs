//! Trust public key resolution
//!
//! The key used for offline verification is looked up through a fixed
//! chain, first usable candidate wins:
//!
//! 1. remote key distribution, short timeout
//! 2. last fetched key (memory, then the on-disk cache file)
//! 3. bundled PEM file, read once per resolver
//! 4. remote key distribution, long timeout
//! 5. embedded fallback key from configuration
//!
//! Only remote fetches update the cache. A candidate counts only when it
//! parses as an RSA public key. This is a fallback chain, not revocation:
//! a stale cached key keeps verifying until a fetch replaces it.

use crate::backend::KeyDistribution;
use crate::config::VerifierConfig;
use cardtrust_crypto::VerifyingKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Where a trust key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Remote,
    MemoryCache,
    DiskCache,
    Bundled,
    Embedded,
}

#[derive(Debug, Error)]
pub enum TrustError {
    #[error("No trust key could be resolved ({tried} sources tried)")]
    Exhausted { tried: usize },
}

/// A parsed trust key and its provenance
#[derive(Debug, Clone)]
pub struct TrustKeyMaterial {
    pem: String,
    key: VerifyingKey,
    source: KeySource,
    obtained_at: DateTime<Utc>,
}

impl TrustKeyMaterial {
    /// Parse `pem`; `None` when it is not an RSA public key
    pub fn parse(pem: &str, source: KeySource) -> Option<Self> {
        match VerifyingKey::from_pem(pem) {
            Ok(key) => Some(Self {
                pem: pem.to_string(),
                key,
                source,
                obtained_at: Utc::now(),
            }),
            Err(e) => {
                warn!(?source, error = %e, "discarding unusable trust key candidate");
                None
            }
        }
    }

    pub fn pem(&self) -> &str {
        &self.pem
    }

    pub fn key(&self) -> &VerifyingKey {
        &self.key
    }

    pub fn fingerprint(&self) -> &str {
        self.key.fingerprint()
    }

    pub fn source(&self) -> KeySource {
        self.source
    }

    pub fn obtained_at(&self) -> DateTime<Utc> {
        self.obtained_at
    }

    fn with_source(&self, source: KeySource) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }
}

/// Resolves the trust key through the fallback chain
pub struct TrustKeyResolver {
    distribution: Option<Arc<dyn KeyDistribution>>,
    short_timeout: Duration,
    long_timeout: Duration,
    bundled_path: Option<PathBuf>,
    bundled: OnceCell<Option<TrustKeyMaterial>>,
    cache_path: Option<PathBuf>,
    embedded_pem: String,
    cached: RwLock<Option<Arc<TrustKeyMaterial>>>,
    /// Holds the outcome of the most recent remote fetch
    fetch_gate: Mutex<Option<Arc<TrustKeyMaterial>>>,
    fetch_generation: AtomicU64,
}

impl std::fmt::Debug for TrustKeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustKeyResolver")
            .field("remote", &self.distribution.is_some())
            .field("bundled_path", &self.bundled_path)
            .field("cache_path", &self.cache_path)
            .field("generation", &self.fetch_generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl TrustKeyResolver {
    pub fn new(config: &VerifierConfig, distribution: Option<Arc<dyn KeyDistribution>>) -> Self {
        Self {
            distribution,
            short_timeout: config.key_fetch_short_timeout,
            long_timeout: config.key_fetch_long_timeout,
            bundled_path: config.bundled_key_path.clone(),
            bundled: OnceCell::new(),
            cache_path: config.key_cache_path.clone(),
            embedded_pem: config.embedded_public_key_pem.clone(),
            cached: RwLock::new(None),
            fetch_gate: Mutex::new(None),
            fetch_generation: AtomicU64::new(0),
        }
    }

    /// Walk the chain and return the first usable key
    pub async fn resolve(&self) -> Result<Arc<TrustKeyMaterial>, TrustError> {
        let mut tried = 0;

        if self.distribution.is_some() {
            tried += 1;
            if let Some(key) = self.fetch_remote(self.short_timeout).await {
                return Ok(self.chosen(key));
            }
        }

        tried += 1;
        if let Some(key) = self.cached() {
            return Ok(self.chosen(Arc::new(key.with_source(KeySource::MemoryCache))));
        }
        if let Some(path) = &self.cache_path {
            tried += 1;
            if let Some(key) = read_pem_file(path, KeySource::DiskCache).await {
                return Ok(self.chosen(Arc::new(key)));
            }
        }

        if let Some(path) = &self.bundled_path {
            tried += 1;
            let bundled = self
                .bundled
                .get_or_init(|| read_pem_file(path, KeySource::Bundled))
                .await;
            if let Some(key) = bundled {
                return Ok(self.chosen(Arc::new(key.clone())));
            }
        }

        if self.distribution.is_some() {
            tried += 1;
            if let Some(key) = self.fetch_remote(self.long_timeout).await {
                return Ok(self.chosen(key));
            }
        }

        tried += 1;
        if let Some(key) = TrustKeyMaterial::parse(&self.embedded_pem, KeySource::Embedded) {
            return Ok(self.chosen(Arc::new(key)));
        }

        warn!(tried, "trust key resolution exhausted");
        Err(TrustError::Exhausted { tried })
    }

    /// Key held in memory from the last successful fetch
    pub fn cached(&self) -> Option<Arc<TrustKeyMaterial>> {
        self.cached
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of remote fetches that actually ran
    pub fn fetch_count(&self) -> u64 {
        self.fetch_generation.load(Ordering::Acquire)
    }

    fn chosen(&self, key: Arc<TrustKeyMaterial>) -> Arc<TrustKeyMaterial> {
        info!(
            source = ?key.source(),
            key_id = key.fingerprint(),
            "trust key resolved"
        );
        key
    }

    /// Single-flight remote fetch
    ///
    /// Callers that queued behind a fetch which completed while they waited
    /// take its outcome instead of fetching again.
    async fn fetch_remote(&self, timeout: Duration) -> Option<Arc<TrustKeyMaterial>> {
        let distribution = self.distribution.as_ref()?;
        let observed = self.fetch_generation.load(Ordering::Acquire);
        let mut last = self.fetch_gate.lock().await;
        if self.fetch_generation.load(Ordering::Acquire) != observed {
            debug!("reusing outcome of concurrent key fetch");
            return last.clone();
        }

        let outcome = match tokio::time::timeout(timeout, distribution.fetch_public_key(timeout))
            .await
        {
            Ok(Ok(pem)) => TrustKeyMaterial::parse(&pem, KeySource::Remote).map(Arc::new),
            Ok(Err(e)) => {
                warn!(error = %e, ?timeout, "trust key fetch failed");
                None
            }
            Err(_) => {
                warn!(?timeout, "trust key fetch timed out");
                None
            }
        };

        if let Some(key) = &outcome {
            self.store(key).await;
        }
        *last = outcome.clone();
        self.fetch_generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    async fn store(&self, key: &Arc<TrustKeyMaterial>) {
        *self
            .cached
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(key));

        if let Some(path) = &self.cache_path {
            if let Err(e) = tokio::fs::write(path, key.pem()).await {
                warn!(path = %path.display(), error = %e, "failed to write trust key cache");
            }
        }
    }
}

async fn read_pem_file(path: &Path, source: KeySource) -> Option<TrustKeyMaterial> {
    match tokio::fs::read_to_string(path).await {
        Ok(pem) => TrustKeyMaterial::parse(&pem, source),
        Err(e) => {
            debug!(path = %path.display(), ?source, error = %e, "key file unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use async_trait::async_trait;
    use cardtrust_crypto::rsa::pkcs8::{EncodePublicKey, LineEnding};
    use cardtrust_crypto::rsa::{RsaPrivateKey, RsaPublicKey};
    use std::sync::atomic::AtomicUsize;
    use std::sync::OnceLock;

    fn pem(slot: usize) -> String {
        static KEYS: OnceLock<Vec<String>> = OnceLock::new();
        KEYS.get_or_init(|| {
            let mut rng = rand::thread_rng();
            (0..3)
                .map(|_| {
                    let private = RsaPrivateKey::new(&mut rng, 1024).unwrap();
                    RsaPublicKey::from(&private)
                        .to_public_key_pem(LineEnding::LF)
                        .unwrap()
                })
                .collect()
        })[slot]
            .clone()
    }

    struct ScriptedKeys {
        responses: std::sync::Mutex<Vec<Result<String, BackendError>>>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedKeys {
        fn new(responses: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Self::delayed(responses, Duration::ZERO)
        }

        fn delayed(responses: Vec<Result<String, BackendError>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                responses: std::sync::Mutex::new(responses),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeyDistribution for ScriptedKeys {
        async fn fetch_public_key(&self, _timeout: Duration) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Err(BackendError::Connection("offline".into()))
            } else {
                responses.remove(0)
            }
        }
    }

    fn config() -> VerifierConfig {
        VerifierConfig::default().with_embedded_public_key_pem(pem(2))
    }

    fn resolver(config: &VerifierConfig, keys: &Arc<ScriptedKeys>) -> TrustKeyResolver {
        let distribution: Arc<dyn KeyDistribution> = keys.clone();
        TrustKeyResolver::new(config, Some(distribution))
    }

    #[tokio::test]
    async fn test_remote_key_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("trust.pem");
        let config = config().with_key_cache_path(&cache);
        let keys = ScriptedKeys::new(vec![Ok(pem(0))]);
        let chain = resolver(&config, &keys);

        let first = chain.resolve().await.unwrap();
        assert_eq!(first.source(), KeySource::Remote);
        assert_eq!(std::fs::read_to_string(&cache).unwrap(), pem(0));

        let second = chain.resolve().await.unwrap();
        assert_eq!(second.source(), KeySource::MemoryCache);
        assert_eq!(second.fingerprint(), first.fingerprint());
    }

    #[tokio::test]
    async fn test_disk_cache_used_when_memory_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("trust.pem");
        std::fs::write(&cache, pem(1)).unwrap();
        let config = config().with_key_cache_path(&cache);
        let keys = ScriptedKeys::new(vec![]);

        let key = resolver(&config, &keys).resolve().await.unwrap();
        assert_eq!(key.source(), KeySource::DiskCache);
        assert_eq!(keys.calls(), 1);
    }

    #[tokio::test]
    async fn test_bundled_before_slow_remote() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.pem");
        std::fs::write(&bundled, pem(1)).unwrap();
        let config = config().with_bundled_key_path(&bundled);
        let keys = ScriptedKeys::new(vec![Err(BackendError::Timeout(Duration::from_secs(3)))]);
        let chain = resolver(&config, &keys);

        let key = chain.resolve().await.unwrap();
        assert_eq!(key.source(), KeySource::Bundled);
        assert_eq!(keys.calls(), 1);
        assert!(chain.cached().is_none());

        // Read once: removing the file does not matter any more
        std::fs::remove_file(&bundled).unwrap();
        let again = chain.resolve().await.unwrap();
        assert_eq!(again.source(), KeySource::Bundled);
    }

    #[tokio::test]
    async fn test_slow_remote_then_embedded() {
        let keys = ScriptedKeys::new(vec![
            Err(BackendError::Timeout(Duration::from_secs(3))),
            Ok(pem(0)),
        ]);
        let key = resolver(&config(), &keys).resolve().await.unwrap();
        assert_eq!(key.source(), KeySource::Remote);
        assert_eq!(keys.calls(), 2);

        let offline = ScriptedKeys::new(vec![]);
        let key = resolver(&config(), &offline).resolve().await.unwrap();
        assert_eq!(key.source(), KeySource::Embedded);
        assert_eq!(offline.calls(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_candidates_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let bundled = dir.path().join("bundled.pem");
        std::fs::write(&bundled, "not a key").unwrap();
        let config = VerifierConfig::default()
            .with_bundled_key_path(&bundled)
            .with_embedded_public_key_pem("-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----");
        let keys = ScriptedKeys::new(vec![Ok("garbage".into())]);

        let err = resolver(&config, &keys).resolve().await.unwrap_err();
        assert!(matches!(err, TrustError::Exhausted { tried: 5 }));
    }

    #[tokio::test]
    async fn test_without_remote_uses_embedded() {
        let chain = TrustKeyResolver::new(&config(), None);
        let key = chain.resolve().await.unwrap();
        assert_eq!(key.source(), KeySource::Embedded);
        assert_eq!(chain.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_single_fetch_in_flight() {
        let keys = ScriptedKeys::delayed(vec![Ok(pem(0))], Duration::from_millis(50));
        let chain = Arc::new(resolver(&config(), &keys));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let chain = Arc::clone(&chain);
                tokio::spawn(async move { chain.resolve().await })
            })
            .collect();
        for handle in handles {
            let key = handle.await.unwrap().unwrap();
            assert_eq!(key.fingerprint(), chain.cached().unwrap().fingerprint());
        }
        assert_eq!(keys.calls(), 1);
        assert_eq!(chain.fetch_count(), 1);
    }
}
