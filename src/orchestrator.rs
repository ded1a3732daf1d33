//! Verification state machine
//!
//! ```text
//! Idle -> Acquiring -> Normalizing -> OnlineVerify -> Concluded
//!                           |               |
//!                           |               v (error, timeout, cancel)
//!                           +---------> OfflineVerify -> Concluded
//! ```
//!
//! Every call is a fresh attempt with its own id; nothing from an earlier
//! attempt is reused. Online verification is preferred but never required:
//! any failure on that path falls through to offline verification.

use crate::backend::{Connectivity, ConnectivityFlag, RemoteVerdict, RemoteVerifier};
use crate::config::VerifierConfig;
use crate::credential::{
    CredentialFields, RejectionReason, TrustLevel, VerificationMode, VerifiedCredential,
};
use crate::normalizer::{normalize, CredentialEnvelope, NormalizationRejection};
use crate::presence::CardEvent;
use crate::tag::{SharedTransport, TagSession};
use crate::transport::PageTransport;
use crate::trust::TrustKeyResolver;
use crate::verifier::{SignatureVerifier, VerifyError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// States visited by one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Idle,
    Acquiring,
    Normalizing,
    OnlineVerify,
    OfflineVerify,
    Concluded,
}

/// Which acquisition candidate supplied the text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TextSource {
    /// Handed in directly, e.g. from a QR scanner
    Provided,
    Decrypted,
    Ndef,
    HexRaw,
    RawUtf8,
}

/// Everything captured from one tag presentation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedTag {
    pub uid: Option<Vec<u8>>,
    /// Content already decrypted by the reader, if it does that
    pub decrypted: Option<String>,
    pub ndef_text: Option<String>,
    /// Data-area bytes as read
    pub raw: Vec<u8>,
}

impl CapturedTag {
    /// First non-empty candidate in priority order
    pub fn acquire(&self) -> Option<(TextSource, String)> {
        let non_empty = |text: &str| {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_string())
        };

        if let Some(text) = self.decrypted.as_deref().and_then(non_empty) {
            return Some((TextSource::Decrypted, text));
        }
        if let Some(text) = self.ndef_text.as_deref().and_then(non_empty) {
            return Some((TextSource::Ndef, text));
        }
        if let Some(text) = hex_text(&self.raw).as_deref().and_then(non_empty) {
            return Some((TextSource::HexRaw, text));
        }
        raw_text(&self.raw).map(|text| (TextSource::RawUtf8, text))
    }
}

/// Raw bytes that are themselves ASCII hex of UTF-8 text
fn hex_text(raw: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(trim_padding(raw)).ok()?.trim();
    if text.len() < 2 || text.len() % 2 != 0 || !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    String::from_utf8(hex::decode(text).ok()?).ok()
}

fn raw_text(raw: &[u8]) -> Option<String> {
    let lossy = String::from_utf8_lossy(trim_padding(raw));
    let text = lossy.trim_matches(|c: char| c.is_control() || c.is_whitespace() || c == '\u{FFFD}');
    (!text.is_empty()).then(|| text.to_string())
}

// Unused pages read back as zeros; 0xFE is the TLV terminator.
fn trim_padding(raw: &[u8]) -> &[u8] {
    let end = raw
        .iter()
        .rposition(|&b| b != 0x00 && b != 0xFE)
        .map_or(0, |i| i + 1);
    let start = raw[..end].iter().position(|&b| b != 0x00).unwrap_or(end);
    &raw[start..end]
}

/// Final result of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// The credential was checked; see [`VerifiedCredential::is_valid`]
    Credential { credential: VerifiedCredential },
    /// The credential was checked and refused
    Rejected { reason: RejectionReason },
    /// No credential could be read from the captured text
    Unreadable { rejection: NormalizationRejection },
    /// The credential could not be checked at all
    Unverifiable { detail: String },
}

/// Outcome plus provenance of one attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    attempt_id: Uuid,
    mode: VerificationMode,
    source: Option<TextSource>,
    trail: Vec<VerificationState>,
    concluded_at: DateTime<Utc>,
    #[serde(flatten)]
    outcome: Outcome,
}

impl Verdict {
    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// `Online` only when the remote verifier decided the outcome
    pub fn mode(&self) -> VerificationMode {
        self.mode
    }

    pub fn source(&self) -> Option<TextSource> {
        self.source
    }

    pub fn trail(&self) -> &[VerificationState] {
        &self.trail
    }

    pub fn concluded_at(&self) -> DateTime<Utc> {
        self.concluded_at
    }

    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn credential(&self) -> Option<&VerifiedCredential> {
        match &self.outcome {
            Outcome::Credential { credential } => Some(credential),
            _ => None,
        }
    }

    /// A credential was produced and it is currently valid
    pub fn is_accepted(&self) -> bool {
        self.credential().is_some_and(VerifiedCredential::is_valid)
    }
}

struct Attempt {
    id: Uuid,
    trail: Vec<VerificationState>,
}

impl Attempt {
    fn start() -> Self {
        Self {
            id: Uuid::new_v4(),
            trail: vec![VerificationState::Idle],
        }
    }

    fn enter(&mut self, state: VerificationState) {
        debug!(attempt_id = %self.id, ?state, "verification state");
        self.trail.push(state);
    }

    fn conclude(
        mut self,
        mode: VerificationMode,
        source: Option<TextSource>,
        outcome: Outcome,
    ) -> Verdict {
        self.trail.push(VerificationState::Concluded);
        match &outcome {
            Outcome::Credential { credential } => info!(
                attempt_id = %self.id,
                %mode,
                valid = credential.is_valid(),
                trust = ?credential.trust_level(),
                "verification concluded"
            ),
            other => info!(attempt_id = %self.id, %mode, outcome = ?other, "verification concluded"),
        }
        Verdict {
            attempt_id: self.id,
            mode,
            source,
            trail: self.trail,
            concluded_at: Utc::now(),
            outcome,
        }
    }
}

/// Drives acquisition, normalization and verification
pub struct VerificationOrchestrator {
    verifier: SignatureVerifier,
    resolver: Arc<TrustKeyResolver>,
    remote: Option<Arc<dyn RemoteVerifier>>,
    connectivity: Arc<dyn Connectivity>,
    online_timeout: Duration,
    scan_page_limit: usize,
    clock: fn() -> DateTime<Utc>,
}

impl VerificationOrchestrator {
    /// Offline-only orchestrator; add a remote with [`Self::with_remote`]
    pub fn new(config: &VerifierConfig, resolver: Arc<TrustKeyResolver>) -> Self {
        Self {
            verifier: SignatureVerifier::new(config.mask_key.clone()),
            resolver,
            remote: None,
            connectivity: Arc::new(ConnectivityFlag::new(false)),
            online_timeout: config.online_timeout,
            scan_page_limit: config.scan_page_limit,
            clock: Utc::now,
        }
    }

    /// Wire the HTTP backend in as both remote verifier and key source
    #[cfg(feature = "http")]
    pub fn from_config(
        config: &VerifierConfig,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, crate::backend::BackendError> {
        let backend = Arc::new(crate::backend::HttpBackend::new(config)?);
        let keys: Arc<dyn crate::backend::KeyDistribution> = backend.clone();
        let resolver = Arc::new(TrustKeyResolver::new(config, Some(keys)));
        Ok(Self::new(config, resolver).with_remote(backend, connectivity))
    }

    pub fn with_remote(
        mut self,
        remote: Arc<dyn RemoteVerifier>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        self.remote = Some(remote);
        self.connectivity = connectivity;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn resolver(&self) -> &Arc<TrustKeyResolver> {
        &self.resolver
    }

    /// Verify text captured outside a tag session (QR scanner, clipboard)
    pub async fn verify_text(&self, text: &str, cancel: &CancellationToken) -> Verdict {
        let mut attempt = Attempt::start();
        attempt.enter(VerificationState::Acquiring);
        let text = text.trim();
        if text.is_empty() {
            return attempt.conclude(
                VerificationMode::Offline,
                None,
                Outcome::Unreadable {
                    rejection: NormalizationRejection::Empty,
                },
            );
        }
        self.verify_acquired(attempt, TextSource::Provided, text, self.online_timeout, cancel)
            .await
    }

    /// Verify a capture, bounding the online path by `online_timeout`
    pub async fn verify_capture(
        &self,
        capture: &CapturedTag,
        online_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Verdict {
        let mut attempt = Attempt::start();
        attempt.enter(VerificationState::Acquiring);
        match capture.acquire() {
            Some((source, text)) => {
                debug!(attempt_id = %attempt.id, ?source, "text acquired");
                self.verify_acquired(attempt, source, &text, online_timeout, cancel)
                    .await
            }
            None => attempt.conclude(
                VerificationMode::Offline,
                None,
                Outcome::Unreadable {
                    rejection: NormalizationRejection::Empty,
                },
            ),
        }
    }

    /// Read UID and NDEF text through `session`
    ///
    /// Never fails; whatever could be read ends up in the capture.
    pub fn capture<T: PageTransport>(&self, session: &mut TagSession<T>) -> CapturedTag {
        let mut codec = session.codec();
        let uid = match codec.probe_uid() {
            Ok(probe) => Some(probe.uid),
            Err(e) => {
                debug!(error = %e, "UID probe failed");
                None
            }
        };
        let read = codec.read_text(self.scan_page_limit);
        CapturedTag {
            uid,
            decrypted: None,
            ndef_text: read.record.map(|record| record.text),
            raw: read.raw,
        }
    }

    /// Capture from `session` and verify
    pub async fn verify_tag<T: PageTransport>(
        &self,
        session: &mut TagSession<T>,
        cancel: &CancellationToken,
    ) -> Verdict {
        let capture = self.capture(session);
        self.verify_capture(&capture, self.online_timeout, cancel)
            .await
    }

    /// Start one attempt per inserted card until `events` closes or `cancel`
    /// fires
    ///
    /// The tag session is released before verification starts so presence
    /// polling keeps running during network calls.
    pub async fn run_card_events<T: PageTransport>(
        &self,
        transport: SharedTransport<T>,
        mut events: mpsc::Receiver<CardEvent>,
        verdicts: mpsc::Sender<Verdict>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let uid = match event {
                Some(CardEvent::Inserted { uid }) => uid,
                Some(CardEvent::Removed) => {
                    debug!("card removed");
                    continue;
                }
                None => break,
            };

            info!(uid = %hex::encode_upper(&uid), "card inserted, starting verification");
            let capture = {
                let mut session = TagSession::open(&transport).await;
                self.capture(&mut session)
            };
            let verdict = self
                .verify_capture(&capture, self.online_timeout, &cancel.child_token())
                .await;
            if verdicts.send(verdict).await.is_err() {
                debug!("verdict receiver dropped, stopping");
                break;
            }
        }
    }

    async fn verify_acquired(
        &self,
        mut attempt: Attempt,
        source: TextSource,
        text: &str,
        online_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Verdict {
        attempt.enter(VerificationState::Normalizing);
        let envelope = match normalize(text) {
            Ok(envelope) => envelope,
            Err(rejection) => {
                return attempt.conclude(
                    VerificationMode::Offline,
                    Some(source),
                    Outcome::Unreadable { rejection },
                )
            }
        };
        debug!(attempt_id = %attempt.id, kind = envelope.kind(), "credential normalized");

        if let Some(remote) = self.remote.as_ref().filter(|_| self.connectivity.is_online()) {
            attempt.enter(VerificationState::OnlineVerify);
            if let Some(remote_verdict) = self
                .verify_online(remote.as_ref(), text, online_timeout, cancel, attempt.id)
                .await
            {
                return attempt.conclude(
                    VerificationMode::Online,
                    Some(source),
                    online_outcome(remote_verdict),
                );
            }
        }

        attempt.enter(VerificationState::OfflineVerify);
        let outcome = self.verify_offline(&envelope).await;
        attempt.conclude(VerificationMode::Offline, Some(source), outcome)
    }

    /// `None` means fall through to offline verification
    async fn verify_online(
        &self,
        remote: &dyn RemoteVerifier,
        text: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        attempt_id: Uuid,
    ) -> Option<RemoteVerdict> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(%attempt_id, "online verification cancelled, falling back to offline");
                None
            }
            result = tokio::time::timeout(timeout, remote.verify(text)) => match result {
                Ok(Ok(verdict)) => Some(verdict),
                Ok(Err(e)) => {
                    warn!(%attempt_id, error = %e, "online verification failed, falling back to offline");
                    None
                }
                Err(_) => {
                    warn!(%attempt_id, ?timeout, "online verification timed out, falling back to offline");
                    None
                }
            }
        }
    }

    async fn verify_offline(&self, envelope: &CredentialEnvelope) -> Outcome {
        let now = (self.clock)();
        match envelope {
            CredentialEnvelope::Standard(standard) => {
                let key = match self.resolver.resolve().await {
                    Ok(key) => key,
                    Err(e) => {
                        return Outcome::Unverifiable {
                            detail: e.to_string(),
                        }
                    }
                };
                match self.verifier.verify_standard(standard, key.key(), now) {
                    Ok(credential) => Outcome::Credential { credential },
                    Err(reason) => Outcome::Rejected { reason },
                }
            }
            CredentialEnvelope::Compact(compact) => {
                match self.verifier.verify_compact(compact, now) {
                    Ok(credential) => Outcome::Credential { credential },
                    Err(VerifyError::Rejected(reason)) => Outcome::Rejected { reason },
                    Err(e @ VerifyError::MaskKeyUnavailable) => Outcome::Unverifiable {
                        detail: e.to_string(),
                    },
                }
            }
        }
    }
}

fn online_outcome(remote: RemoteVerdict) -> Outcome {
    let reason = (!remote.valid).then_some(RejectionReason::RemoteRejected);
    if let Some(error) = &remote.error {
        info!(valid = remote.valid, %error, "remote verifier reported");
    }
    let member = match (remote.member, reason) {
        (Some(member), _) => member,
        (None, Some(reason)) => return Outcome::Rejected { reason },
        (None, None) => Default::default(),
    };
    let fields = CredentialFields {
        member_id: member.member_id.unwrap_or_default(),
        membership_id: member.membership_id,
        name: member.name.unwrap_or_default(),
        status: member.status,
        valid_until: None,
    };
    Outcome::Credential {
        credential: VerifiedCredential::new(
            fields,
            VerificationMode::Online,
            TrustLevel::Authority,
            reason,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, RemoteMember};
    use crate::tag::shared_transport;
    use crate::transport::MemoryTag;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const UID: [u8; 7] = [0x04, 0x10, 0x20, 0x30, 0x40, 0x50, 0x60];
    const CLEAR_COMPACT: &str =
        r#"{"v":1,"mid":"M-7","name":"Ada","exp":"20991231","sig":"AAECAwQFBgcICQoLDA0ODw=="}"#;

    enum Reply {
        Verdict(RemoteVerdict),
        Error(BackendError),
        Hang,
    }

    struct StubRemote {
        reply: Reply,
        calls: AtomicUsize,
    }

    impl StubRemote {
        fn new(reply: Reply) -> Arc<Self> {
            Arc::new(Self {
                reply,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteVerifier for StubRemote {
        async fn verify(&self, _text: &str) -> Result<RemoteVerdict, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Reply::Verdict(v) => Ok(v.clone()),
                Reply::Error(e) => Err(e.clone()),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(BackendError::Timeout(Duration::from_secs(3600)))
                }
            }
        }
    }

    fn offline() -> VerificationOrchestrator {
        let config = VerifierConfig::default()
            .with_embedded_public_key_pem("not a key")
            .with_online_timeout(Duration::from_millis(100));
        let resolver = Arc::new(TrustKeyResolver::new(&config, None));
        VerificationOrchestrator::new(&config, resolver)
    }

    fn online(remote: &Arc<StubRemote>) -> VerificationOrchestrator {
        let remote: Arc<dyn RemoteVerifier> = remote.clone();
        offline().with_remote(remote, Arc::new(ConnectivityFlag::new(true)))
    }

    fn accepted_member() -> RemoteVerdict {
        RemoteVerdict {
            valid: true,
            error: None,
            member: Some(RemoteMember {
                member_id: Some("M-7".into()),
                membership_id: Some("2024-0007".into()),
                name: Some("Ada".into()),
                status: Some("active".into()),
            }),
        }
    }

    use VerificationState::*;

    #[test]
    fn test_acquisition_priority() {
        let capture = CapturedTag {
            uid: None,
            decrypted: Some("  ".into()),
            ndef_text: Some("from-ndef".into()),
            raw: b"from-raw".to_vec(),
        };
        assert_eq!(
            capture.acquire(),
            Some((TextSource::Ndef, "from-ndef".to_string()))
        );

        let capture = CapturedTag {
            decrypted: Some("secret".into()),
            ..capture
        };
        assert_eq!(capture.acquire().unwrap().0, TextSource::Decrypted);

        let hex_raw = CapturedTag {
            raw: [hex::encode("hello").as_bytes(), &[0xFEu8, 0, 0][..]].concat(),
            ..Default::default()
        };
        assert_eq!(
            hex_raw.acquire(),
            Some((TextSource::HexRaw, "hello".to_string()))
        );

        let raw = CapturedTag {
            raw: [&[0u8, 0][..], &b"plain text"[..], &[0xFEu8, 0, 0, 0][..]].concat(),
            ..Default::default()
        };
        assert_eq!(
            raw.acquire(),
            Some((TextSource::RawUtf8, "plain text".to_string()))
        );

        let empty = CapturedTag {
            raw: vec![0; 16],
            ..Default::default()
        };
        assert_eq!(empty.acquire(), None);
    }

    #[test]
    fn test_empty_ndef_text_is_skipped() {
        let capture = CapturedTag {
            ndef_text: Some(String::new()),
            raw: b"plain text".to_vec(),
            ..Default::default()
        };
        assert_eq!(
            capture.acquire(),
            Some((TextSource::RawUtf8, "plain text".to_string()))
        );
    }

    #[tokio::test]
    async fn test_offline_compact() {
        let verdict = offline()
            .verify_text(CLEAR_COMPACT, &CancellationToken::new())
            .await;
        assert_eq!(verdict.mode(), VerificationMode::Offline);
        assert_eq!(
            verdict.trail(),
            &[Idle, Acquiring, Normalizing, OfflineVerify, Concluded]
        );
        let credential = verdict.credential().unwrap();
        assert_eq!(credential.member_id(), "M-7");
        assert_eq!(credential.trust_level(), TrustLevel::Structural);
        assert!(verdict.is_accepted());
    }

    #[tokio::test]
    async fn test_online_authority() {
        let remote = StubRemote::new(Reply::Verdict(accepted_member()));
        let verdict = online(&remote)
            .verify_text(CLEAR_COMPACT, &CancellationToken::new())
            .await;

        assert_eq!(remote.calls(), 1);
        assert_eq!(verdict.mode(), VerificationMode::Online);
        assert_eq!(
            verdict.trail(),
            &[Idle, Acquiring, Normalizing, OnlineVerify, Concluded]
        );
        let credential = verdict.credential().unwrap();
        assert_eq!(credential.trust_level(), TrustLevel::Authority);
        assert_eq!(credential.membership_id(), Some("2024-0007"));
    }

    #[tokio::test]
    async fn test_online_rejection_is_final() {
        let remote = StubRemote::new(Reply::Verdict(RemoteVerdict {
            valid: false,
            error: Some("revoked".into()),
            member: None,
        }));
        let verdict = online(&remote)
            .verify_text(CLEAR_COMPACT, &CancellationToken::new())
            .await;
        assert_eq!(verdict.mode(), VerificationMode::Online);
        assert_eq!(
            verdict.outcome(),
            &Outcome::Rejected {
                reason: RejectionReason::RemoteRejected
            }
        );
    }

    #[tokio::test]
    async fn test_online_error_falls_back() {
        let remote = StubRemote::new(Reply::Error(BackendError::Http {
            status: 502,
            body: String::new(),
        }));
        let verdict = online(&remote)
            .verify_text(CLEAR_COMPACT, &CancellationToken::new())
            .await;
        assert_eq!(verdict.mode(), VerificationMode::Offline);
        assert_eq!(
            verdict.trail(),
            &[Idle, Acquiring, Normalizing, OnlineVerify, OfflineVerify, Concluded]
        );
        assert!(verdict.is_accepted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_online_timeout_falls_back() {
        let remote = StubRemote::new(Reply::Hang);
        let verdict = online(&remote)
            .verify_text(CLEAR_COMPACT, &CancellationToken::new())
            .await;
        assert_eq!(remote.calls(), 1);
        assert_eq!(verdict.mode(), VerificationMode::Offline);
        assert!(verdict.trail().contains(&OfflineVerify));
    }

    #[tokio::test]
    async fn test_cancelled_online_falls_back() {
        let remote = StubRemote::new(Reply::Hang);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let verdict = online(&remote).verify_text(CLEAR_COMPACT, &cancel).await;
        assert_eq!(verdict.mode(), VerificationMode::Offline);
        assert!(verdict.is_accepted());
    }

    #[tokio::test]
    async fn test_unreadable_never_goes_online() {
        let remote = StubRemote::new(Reply::Verdict(accepted_member()));
        let verdict = online(&remote)
            .verify_text("definitely not a credential", &CancellationToken::new())
            .await;
        assert_eq!(remote.calls(), 0);
        assert_eq!(
            verdict.outcome(),
            &Outcome::Unreadable {
                rejection: NormalizationRejection::Unparseable
            }
        );
        assert_eq!(verdict.trail(), &[Idle, Acquiring, Normalizing, Concluded]);
    }

    #[tokio::test]
    async fn test_standard_without_trust_key_is_unverifiable() {
        let verdict = offline()
            .verify_text("e30=|AAAA|e30=", &CancellationToken::new())
            .await;
        assert!(matches!(verdict.outcome(), Outcome::Unverifiable { .. }));
    }

    #[tokio::test]
    async fn test_masked_without_key_is_unverifiable() {
        let text = format!("NFC_ENC_V1:{}", STANDARD.encode(b"\x01\x02\x03"));
        let verdict = offline().verify_text(&text, &CancellationToken::new()).await;
        assert!(matches!(verdict.outcome(), Outcome::Unverifiable { .. }));
    }

    #[tokio::test]
    async fn test_attempt_ids_are_fresh() {
        let orchestrator = offline();
        let cancel = CancellationToken::new();
        let a = orchestrator.verify_text(CLEAR_COMPACT, &cancel).await;
        let b = orchestrator.verify_text(CLEAR_COMPACT, &cancel).await;
        assert_ne!(a.attempt_id(), b.attempt_id());
    }

    #[tokio::test]
    async fn test_verify_tag() {
        let reader = shared_transport(MemoryTag::blank(UID.to_vec()));
        let mut session = TagSession::open(&reader).await;
        session.codec().write_text(CLEAR_COMPACT, "en").unwrap();

        let orchestrator = offline();
        let capture = orchestrator.capture(&mut session);
        assert_eq!(capture.uid.as_deref(), Some(&UID[..]));

        let verdict = orchestrator
            .verify_tag(&mut session, &CancellationToken::new())
            .await;
        assert_eq!(verdict.source(), Some(TextSource::Ndef));
        assert!(verdict.is_accepted());
    }

    #[tokio::test]
    async fn test_unreadable_tag_falls_through_to_raw() {
        let mut tag = MemoryTag::blank(UID.to_vec());
        crate::tag::TagPageCodec::new(&mut tag)
            .write_text(CLEAR_COMPACT, "en")
            .unwrap();
        tag.fail_reads_from(6);
        let reader = shared_transport(tag);
        let mut session = TagSession::open(&reader).await;

        let verdict = offline()
            .verify_tag(&mut session, &CancellationToken::new())
            .await;
        assert_eq!(verdict.source(), Some(TextSource::RawUtf8));
        assert!(matches!(verdict.outcome(), Outcome::Unreadable { .. }));

        session.transport().fail_reads_from(4);
        let verdict = offline()
            .verify_tag(&mut session, &CancellationToken::new())
            .await;
        assert_eq!(verdict.source(), None);
        assert_eq!(
            verdict.outcome(),
            &Outcome::Unreadable {
                rejection: NormalizationRejection::Empty
            }
        );
    }

    #[tokio::test]
    async fn test_run_card_events() {
        let reader = shared_transport(MemoryTag::blank(UID.to_vec()));
        TagSession::open(&reader)
            .await
            .codec()
            .write_text(CLEAR_COMPACT, "en")
            .unwrap();

        let (event_tx, event_rx) = mpsc::channel(4);
        let (verdict_tx, mut verdict_rx) = mpsc::channel(4);
        event_tx
            .send(CardEvent::Inserted { uid: UID.to_vec() })
            .await
            .unwrap();
        event_tx.send(CardEvent::Removed).await.unwrap();
        drop(event_tx);

        offline()
            .run_card_events(reader, event_rx, verdict_tx, CancellationToken::new())
            .await;

        let verdict = verdict_rx.recv().await.unwrap();
        assert!(verdict.is_accepted());
        assert!(verdict_rx.recv().await.is_none());
    }

    #[test]
    fn test_verdict_serializes_flat() {
        let attempt = Attempt::start();
        let verdict = attempt.conclude(
            VerificationMode::Offline,
            Some(TextSource::Provided),
            Outcome::Rejected {
                reason: RejectionReason::BadSignature,
            },
        );
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["outcome"], "rejected");
        assert_eq!(json["reason"], "bad_signature");
        assert_eq!(json["mode"], "offline");
        assert_eq!(json["trail"][1], "concluded");
    }
}
