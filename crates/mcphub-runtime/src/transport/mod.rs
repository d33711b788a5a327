//! Transport construction for MCP connections.
//!
//! Three flavors exist: child-process stdio, streaming HTTP, and an SSE
//! fallback. They share only `connect()` and a description; flavor-specific
//! state lives in the variant, so the facade is a sum type rather than a
//! trait hierarchy.

mod http;
mod sse;
mod stdio;

use mcphub_core::{ServerConfig, ServerKind};

use crate::supervisor::client::{HubClientHandler, McpClient};

pub use http::StreamableHttpTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Result of one transport connection attempt.
pub enum ConnectOutcome {
    /// Protocol client open and serving.
    Connected(McpClient),
    /// The remote side wants OAuth; not a failure, the supervisor parks in
    /// `unauthorized` and waits for the callback.
    Unauthorized,
    /// Anything else.
    Failed(String),
}

/// Transport flavor names, used in logs and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFlavor {
    Stdio,
    StreamableHttp,
    Sse,
}

impl TransportFlavor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::StreamableHttp => "streamable-http",
            Self::Sse => "sse",
        }
    }
}

/// A constructed transport, ready for one connection attempt.
pub enum ServerTransport {
    Stdio(StdioTransport),
    StreamableHttp(StreamableHttpTransport),
    Sse(SseTransport),
}

impl ServerTransport {
    /// Build the transport for a resolved config. For remote servers the
    /// caller picks the flavor (streaming HTTP first, SSE on fallback); for
    /// stdio there is exactly one.
    pub fn for_config(
        server: &str,
        config: &ServerConfig,
        flavor: TransportFlavor,
        bearer: Option<String>,
    ) -> Self {
        match flavor {
            TransportFlavor::Stdio => {
                debug_assert_eq!(config.kind().ok(), Some(ServerKind::Stdio));
                Self::Stdio(StdioTransport::from_config(server, config))
            }
            TransportFlavor::StreamableHttp => Self::StreamableHttp(
                StreamableHttpTransport::from_config(server, config, bearer),
            ),
            TransportFlavor::Sse => Self::Sse(SseTransport::from_config(server, config, bearer)),
        }
    }

    /// Open the protocol client on this transport.
    pub async fn connect(
        self,
        handler: HubClientHandler,
        timeout: std::time::Duration,
    ) -> ConnectOutcome {
        match self {
            Self::Stdio(t) => t.connect(handler, timeout).await,
            Self::StreamableHttp(t) => t.connect(handler, timeout).await,
            Self::Sse(t) => t.connect(handler, timeout).await,
        }
    }

    pub fn flavor(&self) -> TransportFlavor {
        match self {
            Self::Stdio(_) => TransportFlavor::Stdio,
            Self::StreamableHttp(_) => TransportFlavor::StreamableHttp,
            Self::Sse(_) => TransportFlavor::Sse,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Stdio(t) => format!("stdio:{}", t.command()),
            Self::StreamableHttp(t) => format!("http:{}", t.url()),
            Self::Sse(t) => format!("sse:{}", t.url()),
        }
    }
}

/// Classify a connect error as an authorization failure.
///
/// Remote servers signal OAuth in more ways than a clean 401: the body of a
/// rejected handshake, a closed channel after the challenge, or an
/// `invalid_token` error all mean the same thing here.
pub fn is_authorization_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    [
        "401",
        "unauthorized",
        "invalid_token",
        "www-authenticate",
        "bearer",
        "auth required",
        "authrequired",
        "access token",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_authorization_error() {
        assert!(is_authorization_error("HTTP 401 Unauthorized"));
        assert!(is_authorization_error("Missing Bearer token"));
        assert!(is_authorization_error("WWW-Authenticate: Bearer realm=x"));
        assert!(is_authorization_error("invalid_token"));
        assert!(!is_authorization_error("connection refused"));
        assert!(!is_authorization_error("dns lookup failed"));
        assert!(!is_authorization_error("timeout"));
    }

    #[test]
    fn test_flavor_names() {
        assert_eq!(TransportFlavor::Stdio.as_str(), "stdio");
        assert_eq!(TransportFlavor::StreamableHttp.as_str(), "streamable-http");
        assert_eq!(TransportFlavor::Sse.as_str(), "sse");
    }
}
