//! Authorization-server metadata discovery.
//!
//! Tries OIDC discovery first, then falls back to OAuth Authorization Server
//! metadata (RFC 8414), both against the origin of the MCP server URL.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Metadata advertised by the authorization server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

impl OAuthMetadata {
    pub fn supports_pkce(&self) -> bool {
        self.code_challenge_methods_supported
            .iter()
            .any(|m| m == "S256")
    }
}

/// Derive the issuer base from the MCP server URL (scheme + authority).
pub fn issuer_from_server_url(server_url: &str) -> Result<String> {
    let parsed = url::Url::parse(server_url)?;
    let origin = parsed.origin().ascii_serialization();
    Ok(origin)
}

pub struct OAuthDiscovery {
    http: reqwest::Client,
}

impl OAuthDiscovery {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Fetch metadata for the issuer, OIDC first, OAuth-AS second.
    pub async fn fetch(&self, issuer: &str) -> Result<OAuthMetadata> {
        let base = issuer.trim_end_matches('/');

        let oidc_url = format!("{base}/.well-known/openid-configuration");
        debug!(url = %oidc_url, "[OAuthDiscovery] Trying OIDC discovery");
        match self.fetch_metadata(&oidc_url).await {
            Ok(metadata) => {
                info!(issuer = %issuer, "[OAuthDiscovery] OIDC discovery succeeded");
                return Ok(metadata);
            }
            Err(e) => debug!(error = %e, "[OAuthDiscovery] OIDC discovery failed"),
        }

        let oauth_url = format!("{base}/.well-known/oauth-authorization-server");
        debug!(url = %oauth_url, "[OAuthDiscovery] Trying OAuth AS metadata");
        match self.fetch_metadata(&oauth_url).await {
            Ok(metadata) => {
                info!(issuer = %issuer, "[OAuthDiscovery] OAuth AS discovery succeeded");
                Ok(metadata)
            }
            Err(e) => anyhow::bail!(
                "OAuth discovery failed for {issuer}: no metadata at OIDC or OAuth AS endpoints: {e}"
            ),
        }
    }

    async fn fetch_metadata(&self, url: &str) -> Result<OAuthMetadata> {
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("discovery request failed: HTTP {}", response.status());
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issuer_from_server_url() {
        assert_eq!(
            issuer_from_server_url("https://notes.example.com/mcp/v1").unwrap(),
            "https://notes.example.com"
        );
        assert_eq!(
            issuer_from_server_url("http://127.0.0.1:8123/mcp").unwrap(),
            "http://127.0.0.1:8123"
        );
        assert!(issuer_from_server_url("not a url").is_err());
    }

    #[test]
    fn test_supports_pkce() {
        let metadata = OAuthMetadata {
            issuer: "https://example.com".into(),
            authorization_endpoint: "https://example.com/authorize".into(),
            token_endpoint: "https://example.com/token".into(),
            registration_endpoint: None,
            revocation_endpoint: None,
            response_types_supported: vec!["code".into()],
            grant_types_supported: vec!["authorization_code".into()],
            scopes_supported: vec![],
            code_challenge_methods_supported: vec!["S256".into()],
        };
        assert!(metadata.supports_pkce());
    }
}
