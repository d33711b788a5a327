//! Server-sent-events fallback transport.
//!
//! Used when streaming HTTP fails with a non-authorization error. The event
//! source auto-reconnects with a fixed interval capped at five seconds.

use std::sync::Arc;
use std::time::Duration;

use rmcp::transport::common::client_side_sse::FixedInterval;
use rmcp::transport::sse_client::{SseClientConfig, SseClientTransport};
use rmcp::ServiceExt;
use tracing::{error, info};

use mcphub_core::ServerConfig;

use super::http::build_http_client;
use super::{is_authorization_error, ConnectOutcome};
use crate::supervisor::client::HubClientHandler;

/// Cap between SSE reconnect attempts.
const SSE_RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub struct SseTransport {
    server: String,
    url: String,
    headers: std::collections::BTreeMap<String, String>,
    bearer: Option<String>,
}

impl SseTransport {
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
        info!(server = %self.server, url = %self.url, "[SseTransport] Connecting (fallback)");

        let client =
            match build_http_client(&self.server, &self.headers, self.bearer.as_deref()) {
                Ok(client) => client,
                Err(err) => return ConnectOutcome::Failed(err),
            };

        let config = SseClientConfig {
            sse_endpoint: self.url.clone().into(),
            retry_policy: Arc::new(FixedInterval {
                max_times: None,
                duration: SSE_RETRY_INTERVAL,
            }),
            use_message_endpoint: None,
        };

        let transport = match SseClientTransport::start_with_client(client, config).await {
            Ok(transport) => transport,
            Err(e) => {
                let err = format!("{e:#}");
                if is_authorization_error(&err) {
                    info!(server = %self.server, "[SseTransport] Authorization required");
                    return ConnectOutcome::Unauthorized;
                }
                let err = format!("SSE transport failed to start: {err}");
                error!(server = %self.server, "{err}");
                return ConnectOutcome::Failed(err);
            }
        };

        let connect_future = handler.serve(transport);
        match tokio::time::timeout(timeout, connect_future).await {
            Ok(Ok(client)) => {
                info!(server = %self.server, "[SseTransport] Connected");
                ConnectOutcome::Connected(client)
            }
            Ok(Err(e)) => {
                let err = format!("{e:#}");
                if is_authorization_error(&err) {
                    info!(server = %self.server, "[SseTransport] Authorization required");
                    ConnectOutcome::Unauthorized
                } else {
                    let err = format!("SSE connection failed: {err}");
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
