//! OAuth provider flow against a mock authorization server.

use std::sync::Arc;

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcphub_runtime::oauth::{AuthStorage, OAuthProvider};

async fn mock_auth_server() -> MockServer {
    let server = MockServer::start().await;

    // OIDC discovery missing; the provider falls back to OAuth AS metadata.
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "token_endpoint": format!("{}/token", server.uri()),
            "registration_endpoint": format!("{}/register", server.uri()),
            "response_types_supported": ["code"],
            "grant_types_supported": ["authorization_code", "refresh_token"],
            "code_challenge_methods_supported": ["S256"]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/register"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "client_id": "hub-client-1",
            "client_id_issued_at": 1_700_000_000u64
        })))
        .mount(&server)
        .await;

    server
}

fn provider_for(server: &MockServer, storage: Arc<AuthStorage>) -> OAuthProvider {
    OAuthProvider::new(
        "notes",
        &format!("{}/mcp", server.uri()),
        storage,
        "http://127.0.0.1:7000/oauth/callback",
    )
}

#[tokio::test]
async fn test_begin_authorization_discovers_registers_and_builds_url() {
    let server = mock_auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(AuthStorage::new(dir.path()));

    let provider = provider_for(&server, storage.clone());
    let url = provider.begin_authorization().await.unwrap();

    assert!(url.starts_with(&format!("{}/authorize", server.uri())));
    assert!(url.contains("response_type=code"));
    assert!(url.contains("client_id=hub-client-1"));
    assert!(url.contains("code_challenge="));
    assert!(url.contains("code_challenge_method=S256"));
    assert!(url.contains("redirect_uri="));
    assert!(url.contains("notes"));
    assert_eq!(provider.authorization_url(), Some(url.clone()));

    let state = provider.pending_state().expect("state retained for the callback");
    assert!(url.contains(&format!("state={state}")));

    // Registration was persisted for reuse.
    let stored = storage.load_client("notes").await.unwrap();
    assert_eq!(stored.client_id, "hub-client-1");
}

#[tokio::test]
async fn test_registration_happens_once() {
    let server = mock_auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(AuthStorage::new(dir.path()));

    let provider = provider_for(&server, storage.clone());
    provider.begin_authorization().await.unwrap();
    provider.begin_authorization().await.unwrap();

    let registrations = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/register")
        .count();
    assert_eq!(registrations, 1);
}

#[tokio::test]
async fn test_callback_exchanges_code_with_verifier_and_persists_tokens() {
    let server = mock_auth_server().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=auth_code_123"))
        .and(body_string_contains("code_verifier="))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "access_xyz",
            "token_type": "Bearer",
            "refresh_token": "refresh_abc",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(AuthStorage::new(dir.path()));
    let provider = provider_for(&server, storage.clone());

    provider.begin_authorization().await.unwrap();
    provider.complete_authorization("auth_code_123").await.unwrap();

    let tokens = storage.load_tokens("notes").await.unwrap();
    assert_eq!(tokens.access_token, "access_xyz");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh_abc"));
    assert!(!tokens.is_expired());

    assert_eq!(provider.access_token().await.as_deref(), Some("access_xyz"));
}

#[tokio::test]
async fn test_callback_without_pending_authorization_fails() {
    let server = mock_auth_server().await;
    let dir = tempfile::tempdir().unwrap();
    let provider = provider_for(&server, Arc::new(AuthStorage::new(dir.path())));

    let err = provider.complete_authorization("code").await.unwrap_err();
    assert!(err.to_string().contains("no authorization in progress"));
}

#[tokio::test]
async fn test_expired_token_refreshes_once() {
    let server = mock_auth_server().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh_abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "refreshed_token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(AuthStorage::new(dir.path()));
    let provider = provider_for(&server, storage.clone());

    // Seed an expired token and a client registration.
    provider.begin_authorization().await.unwrap();
    storage
        .save_tokens(
            "notes",
            &mcphub_runtime::oauth::OAuthToken {
                access_token: "stale".into(),
                token_type: "Bearer".into(),
                refresh_token: Some("refresh_abc".into()),
                expires_at: Some(chrono::Utc::now() - chrono::Duration::seconds(60)),
                scope: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(
        provider.access_token().await.as_deref(),
        Some("refreshed_token")
    );
    // The rotated response omitted the refresh token; the old one is kept.
    let stored = storage.load_tokens("notes").await.unwrap();
    assert_eq!(stored.refresh_token.as_deref(), Some("refresh_abc"));
}

#[tokio::test]
async fn test_refresh_failure_yields_no_token() {
    let server = mock_auth_server().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(AuthStorage::new(dir.path()));
    let provider = provider_for(&server, storage.clone());

    provider.begin_authorization().await.unwrap();
    storage
        .save_tokens(
            "notes",
            &mcphub_runtime::oauth::OAuthToken {
                access_token: "stale".into(),
                token_type: "Bearer".into(),
                refresh_token: Some("dead".into()),
                expires_at: Some(chrono::Utc::now() - chrono::Duration::seconds(60)),
                scope: None,
            },
        )
        .await
        .unwrap();

    assert!(provider.access_token().await.is_none());
    assert!(!provider.try_refresh().await);
}

#[tokio::test]
async fn test_no_registration_endpoint_means_oauth_unsupported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/.well-known/oauth-authorization-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "issuer": server.uri(),
            "authorization_endpoint": format!("{}/authorize", server.uri()),
            "token_endpoint": format!("{}/token", server.uri())
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let provider = provider_for(&server, Arc::new(AuthStorage::new(dir.path())));

    let err = provider.begin_authorization().await.unwrap_err();
    assert!(err.to_string().contains("registration endpoint"));
}
