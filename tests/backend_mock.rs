//! Mock backend tests using mockito
//!
//! These tests validate the HTTP collaborator without a running backend.

#[cfg(feature = "http")]
mod backend_mock_tests {
    use cardtrust::backend::{BackendError, HttpBackend, KeyDistribution, RemoteVerifier};
    use cardtrust::prelude::*;
    use mockito::{Matcher, Server};
    use std::sync::Arc;
    use std::time::Duration;
    use url::Url;

    const CLEAR_COMPACT: &str =
        r#"{"v":1,"mid":"M-3","name":"Ada","exp":"20991231","sig":"AAECAwQFBgcICQoLDA0ODw=="}"#;

    fn config_for(server: &Server) -> VerifierConfig {
        VerifierConfig::default()
            .with_backend_base_url(Url::parse(&server.url()).unwrap())
            .with_request_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_verify_posts_raw_text() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/qr/verify")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::json!({ "qr_code": "abc|def|ghi" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"success":true,"valid":true,"member_data":{"member_id":"M-1","name":"Ada","status":"active"}}"#,
            )
            .create_async()
            .await;

        let backend = HttpBackend::new(&config_for(&server)).unwrap();
        let verdict = backend.verify("abc|def|ghi").await.unwrap();
        assert!(verdict.valid);
        assert_eq!(verdict.member.unwrap().name.as_deref(), Some("Ada"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_verify_unsuccessful_body_is_refused() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/qr/verify")
            .with_status(200)
            .with_body(r#"{"success":false,"error":"unknown member"}"#)
            .create_async()
            .await;

        let backend = HttpBackend::new(&config_for(&server)).unwrap();
        let err = backend.verify("x").await.unwrap_err();
        assert_eq!(err, BackendError::Refused("unknown member".to_string()));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/qr/public-key")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let backend = HttpBackend::new(&config_for(&server)).unwrap();
        let err = backend
            .fetch_public_key(Duration::from_secs(3))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Http {
                status: 503,
                body: "maintenance".to_string()
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_public_key_fetch() {
        let mut server = Server::new_async().await;
        let pem = VerifierConfig::default().embedded_public_key_pem;
        let _mock = server
            .mock("GET", "/api/qr/public-key")
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "success": true,
                    "public_key": pem,
                    "algorithm": "RSA-PSS-SHA256",
                    "key_format": "PEM"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let backend = HttpBackend::new(&config_for(&server)).unwrap();
        let fetched = backend
            .fetch_public_key(Duration::from_secs(3))
            .await
            .unwrap();
        assert_eq!(fetched, pem);
    }

    #[tokio::test]
    async fn test_garbage_body_is_invalid_response() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/qr/public-key")
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let backend = HttpBackend::new(&config_for(&server)).unwrap();
        let err = backend
            .fetch_public_key(Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_orchestrator_goes_online_when_connected() {
        let mut server = Server::new_async().await;
        let verify = server
            .mock("POST", "/api/qr/verify")
            .with_status(200)
            .with_body(
                r#"{"success":true,"valid":true,"member_data":{"member_id":"M-3","membership_id":"MB-3","name":"Ada","status":"active"}}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let connectivity = Arc::new(ConnectivityFlag::new(true));
        let orchestrator =
            VerificationOrchestrator::from_config(&config_for(&server), connectivity.clone())
                .unwrap();

        let verdict = orchestrator
            .verify_text(CLEAR_COMPACT, &CancellationToken::new())
            .await;
        assert_eq!(verdict.mode(), VerificationMode::Online);
        let credential = verdict.credential().unwrap();
        assert_eq!(credential.trust_level(), TrustLevel::Authority);
        assert_eq!(credential.membership_id(), Some("MB-3"));

        connectivity.set_online(false);
        let verdict = orchestrator
            .verify_text(CLEAR_COMPACT, &CancellationToken::new())
            .await;
        assert_eq!(verdict.mode(), VerificationMode::Offline);
        verify.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_falls_back_offline() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/qr/verify")
            .with_status(500)
            .create_async()
            .await;

        let orchestrator = VerificationOrchestrator::from_config(
            &config_for(&server),
            Arc::new(ConnectivityFlag::new(true)),
        )
        .unwrap();
        let verdict = orchestrator
            .verify_text(CLEAR_COMPACT, &CancellationToken::new())
            .await;
        assert_eq!(verdict.mode(), VerificationMode::Offline);
        assert!(verdict.is_accepted());
    }
}
