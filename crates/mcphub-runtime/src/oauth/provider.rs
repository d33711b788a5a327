//! Per-connection OAuth provider.
//!
//! One provider exists per remote connection attempt. It knows how to
//! discover the authorization server, register the hub as a client (once,
//! persisted), build an authorization URL with PKCE, complete the callback
//! exchange, and refresh tokens. The authorization URL is only ever
//! *exposed* - opening a browser is the supervisor's decision, and it
//! currently never does so automatically.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use parking_lot::Mutex;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use url::Url;

use super::dcr::{register_client, ClientRegistrationRequest};
use super::discovery::{issuer_from_server_url, OAuthDiscovery, OAuthMetadata};
use super::store::{AuthStorage, StoredClient};
use super::token::{OAuthToken, TokenResponse};

/// Secrets minted for one authorization round: the PKCE verifier/challenge
/// pair (RFC 7636, S256 only) and the CSRF state for the redirect.
struct AuthorizationRound {
    verifier: String,
    challenge: String,
    state: String,
}

impl AuthorizationRound {
    fn begin() -> Self {
        let verifier = random_urlsafe(32);
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
            state: random_urlsafe(16),
        }
    }
}

/// `len` random bytes, base64url-encoded without padding.
fn random_urlsafe(len: usize) -> String {
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Verifier and state retained between URL generation and the callback.
#[derive(Debug, Clone)]
struct PendingAuthorization {
    verifier: String,
    state: String,
}

pub struct OAuthProvider {
    server: String,
    server_url: String,
    redirect_uri: String,
    http: reqwest::Client,
    storage: Arc<AuthStorage>,
    pending: Mutex<Option<PendingAuthorization>>,
    generated_auth_url: Mutex<Option<String>>,
}

impl OAuthProvider {
    /// `callback_base_url` is the hub-served redirect prefix; the server
    /// name is appended as the final path segment.
    pub fn new(
        server: &str,
        server_url: &str,
        storage: Arc<AuthStorage>,
        callback_base_url: &str,
    ) -> Self {
        Self {
            server: server.to_string(),
            server_url: server_url.to_string(),
            redirect_uri: format!("{}/{}", callback_base_url.trim_end_matches('/'), server),
            http: reqwest::Client::new(),
            storage,
            pending: Mutex::new(None),
            generated_auth_url: Mutex::new(None),
        }
    }

    /// A valid bearer token, refreshing once if the stored one is expired.
    pub async fn access_token(&self) -> Option<String> {
        let tokens = self.storage.load_tokens(&self.server).await?;
        if !tokens.is_expired() {
            return Some(tokens.access_token);
        }
        if !tokens.can_refresh() {
            debug!(server = %self.server, "[OAuth] Stored token expired, no refresh token");
            return None;
        }
        if self.try_refresh().await {
            self.storage
                .load_tokens(&self.server)
                .await
                .map(|t| t.access_token)
        } else {
            None
        }
    }

    /// The last generated authorization URL, if any.
    pub fn authorization_url(&self) -> Option<String> {
        self.generated_auth_url.lock().clone()
    }

    /// The CSRF `state` of the authorization in progress. The redirect
    /// handler in front of the hub compares this against the callback.
    pub fn pending_state(&self) -> Option<String> {
        self.pending.lock().as_ref().map(|p| p.state.clone())
    }

    /// Discover, register if needed, and build the authorization URL with a
    /// fresh PKCE pair. The verifier is stored for the callback.
    pub async fn begin_authorization(&self) -> Result<String> {
        let client = self.ensure_client().await?;
        let metadata = &client.metadata;

        if !metadata.supports_pkce() && !metadata.code_challenge_methods_supported.is_empty() {
            warn!(
                server = %self.server,
                "[OAuth] Server does not advertise S256, proceeding anyway"
            );
        }

        let round = AuthorizationRound::begin();

        let mut auth_url = Url::parse(&metadata.authorization_endpoint)
            .context("invalid authorization endpoint")?;
        {
            let mut query = auth_url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &client.client_id);
            query.append_pair("redirect_uri", &self.redirect_uri);
            query.append_pair("state", &round.state);
            query.append_pair("code_challenge", &round.challenge);
            query.append_pair("code_challenge_method", "S256");
            if !metadata.scopes_supported.is_empty() {
                query.append_pair("scope", &metadata.scopes_supported.join(" "));
            }
        }

        *self.pending.lock() = Some(PendingAuthorization {
            verifier: round.verifier,
            state: round.state,
        });
        let url = auth_url.to_string();
        *self.generated_auth_url.lock() = Some(url.clone());

        info!(server = %self.server, "[OAuth] Authorization URL generated");
        Ok(url)
    }

    /// Exchange the authorization code using the stored verifier and persist
    /// the resulting tokens.
    pub async fn complete_authorization(&self, code: &str) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .take()
            .context("no authorization in progress")?;
        let client = self.ensure_client().await?;

        info!(server = %self.server, "[OAuth] Exchanging authorization code");

        let mut params = HashMap::new();
        params.insert("grant_type", "authorization_code");
        params.insert("code", code);
        params.insert("redirect_uri", &self.redirect_uri);
        params.insert("client_id", &client.client_id);
        params.insert("code_verifier", &pending.verifier);
        let secret;
        if let Some(s) = &client.client_secret {
            secret = s.clone();
            params.insert("client_secret", &secret);
        }

        let response = self
            .http
            .post(&client.metadata.token_endpoint)
            .form(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("token exchange failed: HTTP {status} - {body}");
        }

        let tokens: OAuthToken = response.json::<TokenResponse>().await?.into();
        self.storage.save_tokens(&self.server, &tokens).await?;
        info!(server = %self.server, "[OAuth] Tokens persisted");
        Ok(())
    }

    /// One refresh attempt; false means the caller should surface
    /// unauthorized.
    pub async fn try_refresh(&self) -> bool {
        match self.refresh().await {
            Ok(()) => true,
            Err(e) => {
                warn!(server = %self.server, error = %e, "[OAuth] Token refresh failed");
                false
            }
        }
    }

    async fn refresh(&self) -> Result<()> {
        let tokens = self
            .storage
            .load_tokens(&self.server)
            .await
            .context("no stored tokens")?;
        let refresh_token = tokens.refresh_token.context("no refresh token")?;
        let client = self.ensure_client().await?;

        info!(server = %self.server, "[OAuth] Refreshing access token");

        let mut params = HashMap::new();
        params.insert("grant_type", "refresh_token");
        params.insert("refresh_token", refresh_token.as_str());
        params.insert("client_id", client.client_id.as_str());
        let secret;
        if let Some(s) = &client.client_secret {
            secret = s.clone();
            params.insert("client_secret", &secret);
        }

        let response = self
            .http
            .post(&client.metadata.token_endpoint)
            .form(&params)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("token refresh failed: HTTP {status} - {body}");
        }

        let mut new_tokens: OAuthToken = response.json::<TokenResponse>().await?.into();
        // Providers may omit the refresh token on rotation; keep the old one.
        if new_tokens.refresh_token.is_none() {
            new_tokens.refresh_token = Some(refresh_token);
        }
        self.storage.save_tokens(&self.server, &new_tokens).await?;
        Ok(())
    }

    /// Load the persisted client registration, or discover + register.
    async fn ensure_client(&self) -> Result<StoredClient> {
        if let Some(client) = self.storage.load_client(&self.server).await {
            return Ok(client);
        }

        let issuer = issuer_from_server_url(&self.server_url)?;
        let metadata = OAuthDiscovery::new(self.http.clone())
            .fetch(&issuer)
            .await?;

        let registration_endpoint = metadata
            .registration_endpoint
            .clone()
            .context("server advertises no registration endpoint; OAuth not supported")?;

        let request = ClientRegistrationRequest::for_redirect_uri(&self.redirect_uri);
        let registered = register_client(&self.http, &registration_endpoint, &request).await?;

        let client = StoredClient {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            issuer,
            metadata,
        };
        self.storage.save_client(&self.server, &client).await?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_challenge_is_s256_of_verifier() {
        let round = AuthorizationRound::begin();
        // 32 random bytes encode to at least 43 characters, the RFC minimum.
        assert!(round.verifier.len() >= 43);
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(round.verifier.as_bytes()));
        assert_eq!(round.challenge, expected);
    }

    #[test]
    fn test_rounds_do_not_repeat() {
        let a = AuthorizationRound::begin();
        let b = AuthorizationRound::begin();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
        assert_ne!(a.state, b.state);
    }

    #[test]
    fn test_random_urlsafe_has_no_padding() {
        let value = random_urlsafe(16);
        assert!(!value.contains('='));
        assert!(!value.contains('+'));
        assert!(!value.contains('/'));
    }

    #[test]
    fn test_redirect_uri_appends_server_name() {
        let provider = OAuthProvider::new(
            "notes",
            "https://example.com/mcp",
            Arc::new(AuthStorage::new("unused")),
            "http://127.0.0.1:7000/oauth/callback/",
        );
        assert_eq!(
            provider.redirect_uri,
            "http://127.0.0.1:7000/oauth/callback/notes"
        );
    }
}
