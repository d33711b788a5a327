//! Dynamic client registration (RFC 7591) against a remote server's
//! advertised registration endpoint.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Registration request the hub sends for itself.
#[derive(Debug, Clone, Serialize)]
pub struct ClientRegistrationRequest {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl ClientRegistrationRequest {
    /// The hub registers as a public client using the code flow with PKCE.
    pub fn for_redirect_uri(redirect_uri: &str) -> Self {
        Self {
            client_name: "MCP Hub".to_string(),
            redirect_uris: vec![redirect_uri.to_string()],
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            scope: None,
        }
    }
}

/// Registration response; only the fields the hub persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_id_issued_at: Option<u64>,
}

/// Register and return the issued credentials.
pub async fn register_client(
    http: &reqwest::Client,
    registration_endpoint: &str,
    request: &ClientRegistrationRequest,
) -> Result<ClientRegistrationResponse> {
    info!(endpoint = %registration_endpoint, "[OAuth] Registering client dynamically");

    let response = http
        .post(registration_endpoint)
        .json(request)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("client registration failed: HTTP {status} - {body}");
    }

    let registered: ClientRegistrationResponse = response.json().await?;
    info!(client_id = %registered.client_id, "[OAuth] Client registered");
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = ClientRegistrationRequest::for_redirect_uri(
            "http://127.0.0.1:7000/oauth/callback/notes",
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["token_endpoint_auth_method"], "none");
        assert_eq!(json["response_types"][0], "code");
        assert_eq!(
            json["redirect_uris"][0],
            "http://127.0.0.1:7000/oauth/callback/notes"
        );
        assert!(json.get("scope").is_none());
    }

    #[test]
    fn test_response_parses_without_secret() {
        let response: ClientRegistrationResponse =
            serde_json::from_str(r#"{ "client_id": "abc123" }"#).unwrap();
        assert_eq!(response.client_id, "abc123");
        assert!(response.client_secret.is_none());
    }
}
