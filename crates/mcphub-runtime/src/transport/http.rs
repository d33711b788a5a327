//! Streaming HTTP transport.
//!
//! One long-lived request per session; the response body is a stream of
//! framed JSON-RPC messages. Resolved headers ride on the underlying
//! `reqwest::Client` as defaults so they are present on every request,
//! including session termination. When the OAuth provider holds a token, an
//! `Authorization: Bearer` header is injected the same way.

use std::collections::BTreeMap;
use std::time::Duration;

use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::StreamableHttpClientTransport;
use rmcp::ServiceExt;
use tracing::{debug, error, info};

use mcphub_core::ServerConfig;

use super::{is_authorization_error, ConnectOutcome};
use crate::supervisor::client::HubClientHandler;

pub struct StreamableHttpTransport {
    server: String,
    url: String,
    headers: BTreeMap<String, String>,
    bearer: Option<String>,
}

impl StreamableHttpTransport {
    pub fn from_config(server: &str, config: &ServerConfig, bearer: Option<String>) -> Self {
        Self {
            server: server.to_string(),
            url: config.url.clone().unwrap_or_default(),
            headers: config.headers.clone(),
            bearer,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn connect(self, handler: HubClientHandler, timeout: Duration) -> ConnectOutcome {
        info!(server = %self.server, url = %self.url, "[HttpTransport] Connecting");

        if let Err(e) = url::Url::parse(&self.url) {
            let err = format!("invalid url '{}': {e}", self.url);
            error!(server = %self.server, "{err}");
            return ConnectOutcome::Failed(err);
        }

        let client =
            match build_http_client(&self.server, &self.headers, self.bearer.as_deref()) {
                Ok(client) => client,
                Err(err) => return ConnectOutcome::Failed(err),
            };

        let config = StreamableHttpClientTransportConfig::with_uri(self.url.as_str());
        let transport = StreamableHttpClientTransport::with_client(client, config);

        let connect_future = handler.serve(transport);
        match tokio::time::timeout(timeout, connect_future).await {
            Ok(Ok(client)) => {
                info!(server = %self.server, "[HttpTransport] Connected");
                ConnectOutcome::Connected(client)
            }
            Ok(Err(e)) => {
                let err = format!("{e:#}");
                if is_authorization_error(&err) {
                    info!(server = %self.server, "[HttpTransport] Authorization required");
                    ConnectOutcome::Unauthorized
                } else {
                    let err = format!("streamable HTTP connection failed: {err}");
                    error!(server = %self.server, "{err}");
                    ConnectOutcome::Failed(err)
                }
            }
            Err(_) => {
                let err = format!("connection timeout ({timeout:?})");
                error!(server = %self.server, "{err}");
                ConnectOutcome::Failed(err)
            }
        }
    }
}

/// Build a `reqwest::Client` carrying the resolved headers (and the bearer
/// token, when one exists) as defaults.
pub(super) fn build_http_client(
    server: &str,
    headers: &BTreeMap<String, String>,
    bearer: Option<&str>,
) -> Result<reqwest::Client, String> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (key, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| format!("invalid header name '{key}': {e}"))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| format!("invalid header value for '{key}': {e}"))?;
        header_map.insert(name, value);
    }

    // A token from the OAuth provider wins over a configured Authorization
    // header; configs that pin a PAT simply never get a provider token.
    if let Some(token) = bearer {
        let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| format!("invalid access token: {e}"))?;
        header_map.insert(reqwest::header::AUTHORIZATION, value);
    }

    debug!(
        server = %server,
        header_count = header_map.len(),
        "[HttpTransport] Built HTTP client"
    );

    reqwest::Client::builder()
        .default_headers(header_map)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_http_client_empty() {
        assert!(build_http_client("s", &BTreeMap::new(), None).is_ok());
    }

    #[test]
    fn test_build_http_client_with_headers_and_bearer() {
        let headers: BTreeMap<String, String> =
            [("X-Custom".to_string(), "v".to_string())].into();
        assert!(build_http_client("s", &headers, Some("tok")).is_ok());
    }

    #[test]
    fn test_build_http_client_invalid_header_name() {
        let headers: BTreeMap<String, String> =
            [("bad header\n".to_string(), "v".to_string())].into();
        assert!(build_http_client("s", &headers, None).is_err());
    }

    #[test]
    fn test_build_http_client_invalid_header_value() {
        let headers: BTreeMap<String, String> =
            [("X-Custom".to_string(), "bad\nvalue".to_string())].into();
        assert!(build_http_client("s", &headers, None).is_err());
    }
}
