//! Error taxonomy for the hub.
//!
//! Every error that crosses the hub boundary carries a stable code string
//! (see [`HubError::code`]) plus a structured data payload so the transport
//! layer in front of the hub can map failures to wire responses without
//! string matching.

use serde_json::{json, Value};
use thiserror::Error;

/// Result alias used throughout the hub.
pub type HubResult<T> = std::result::Result<T, HubError>;

/// All failure modes surfaced by the hub core.
#[derive(Debug, Error)]
pub enum HubError {
    /// The loaded configuration violates the schema.
    ///
    /// Surfaced to the caller of `load()`; running servers are untouched.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Strict placeholder resolution failed to find a variable.
    #[error("variable '{name}' not found while resolving '{field}'")]
    VariableNotFound { name: String, field: String },

    /// Strict placeholder resolution could not execute a `${cmd: …}` command.
    #[error("command execution failed while resolving '{field}': {reason}")]
    CmdExecutionFailed { field: String, reason: String },

    /// A remote transport replied 401. The supervisor parks in the
    /// `unauthorized` state and waits for the authorization callback.
    #[error("server '{server}' requires authorization")]
    Unauthorized {
        server: String,
        authorization_url: Option<String>,
    },

    /// Any other fault during connect. The supervisor records the error and
    /// stays disconnected; no automatic retry happens here.
    #[error("failed to connect to server '{server}': {reason}")]
    ConnectionFailed { server: String, reason: String },

    /// A dispatch operation was attempted before the first connect.
    #[error("server '{0}' has not been initialized")]
    NotInitialized(String),

    /// A dispatch operation was attempted while the server is not connected.
    #[error("server '{server}' is not connected (state: {state})")]
    NotConnected { server: String, state: String },

    /// The requested tool is not advertised by the server.
    #[error("tool '{tool}' not found on server '{server}'")]
    ToolNotFound {
        server: String,
        tool: String,
        available: Vec<String>,
    },

    /// The requested resource URI matches neither a resource nor a template.
    #[error("resource '{uri}' not found on server '{server}'")]
    ResourceNotFound {
        server: String,
        uri: String,
        available: Vec<String>,
    },

    /// The requested prompt is not advertised by the server.
    #[error("prompt '{prompt}' not found on server '{server}'")]
    PromptNotFound {
        server: String,
        prompt: String,
        available: Vec<String>,
    },

    /// Dispatch arguments were neither null, a mapping, nor a sequence.
    #[error("invalid arguments for '{operation}' on server '{server}': expected object, array or null")]
    InvalidArguments { server: String, operation: String },

    /// The backend returned an error while executing a tool.
    #[error("tool '{tool}' failed on server '{server}': {reason}")]
    ToolExecutionFailed {
        server: String,
        tool: String,
        reason: String,
    },

    /// The backend returned an error while reading a resource.
    #[error("failed to read resource '{uri}' on server '{server}': {reason}")]
    ResourceReadFailed {
        server: String,
        uri: String,
        reason: String,
    },

    /// The backend returned an error while rendering a prompt.
    #[error("prompt '{prompt}' failed on server '{server}': {reason}")]
    PromptExecutionFailed {
        server: String,
        prompt: String,
        reason: String,
    },

    /// Hub-level lookup by an unknown server name.
    #[error("no server named '{0}'")]
    ServerNotFound(String),
}

impl HubError {
    /// Stable code string for the wire. The HTTP collaborator maps these to
    /// statuses (NotFound family to 404, NotConnected to 503, the rest 500).
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid(_) => "CONFIG_INVALID",
            Self::VariableNotFound { .. } => "VARIABLE_NOT_FOUND",
            Self::CmdExecutionFailed { .. } => "CMD_EXECUTION_FAILED",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::ConnectionFailed { .. } => "CONNECTION_FAILED",
            Self::NotInitialized(_) => "NOT_INITIALIZED",
            Self::NotConnected { .. } => "NOT_CONNECTED",
            Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            Self::ResourceNotFound { .. } => "RESOURCE_NOT_FOUND",
            Self::PromptNotFound { .. } => "PROMPT_NOT_FOUND",
            Self::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            Self::ToolExecutionFailed { .. } => "TOOL_EXECUTION_FAILED",
            Self::ResourceReadFailed { .. } => "RESOURCE_READ_FAILED",
            Self::PromptExecutionFailed { .. } => "PROMPT_EXECUTION_FAILED",
            Self::ServerNotFound(_) => "SERVER_NOT_FOUND",
        }
    }

    /// Structured payload describing the failure (server name, operation,
    /// offending input). Attached to wire errors so callers can react
    /// programmatically.
    pub fn data(&self) -> Value {
        match self {
            Self::ConfigInvalid(message) => json!({ "message": message }),
            Self::VariableNotFound { name, field } => json!({ "variable": name, "field": field }),
            Self::CmdExecutionFailed { field, reason } => json!({ "field": field, "reason": reason }),
            Self::Unauthorized {
                server,
                authorization_url,
            } => json!({ "server": server, "authorizationUrl": authorization_url }),
            Self::ConnectionFailed { server, reason } => {
                json!({ "server": server, "reason": reason })
            }
            Self::NotInitialized(server) => json!({ "server": server }),
            Self::NotConnected { server, state } => json!({ "server": server, "state": state }),
            Self::ToolNotFound {
                server,
                tool,
                available,
            } => json!({ "server": server, "tool": tool, "available": available }),
            Self::ResourceNotFound {
                server,
                uri,
                available,
            } => json!({ "server": server, "uri": uri, "available": available }),
            Self::PromptNotFound {
                server,
                prompt,
                available,
            } => json!({ "server": server, "prompt": prompt, "available": available }),
            Self::InvalidArguments { server, operation } => {
                json!({ "server": server, "operation": operation })
            }
            Self::ToolExecutionFailed {
                server,
                tool,
                reason,
            } => json!({ "server": server, "tool": tool, "reason": reason }),
            Self::ResourceReadFailed {
                server,
                uri,
                reason,
            } => json!({ "server": server, "uri": uri, "reason": reason }),
            Self::PromptExecutionFailed {
                server,
                prompt,
                reason,
            } => json!({ "server": server, "prompt": prompt, "reason": reason }),
            Self::ServerNotFound(server) => json!({ "server": server }),
        }
    }

    /// True for errors callers fix by changing their request rather than by
    /// waiting or reconnecting.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized(_)
                | Self::NotConnected { .. }
                | Self::ToolNotFound { .. }
                | Self::ResourceNotFound { .. }
                | Self::PromptNotFound { .. }
                | Self::InvalidArguments { .. }
                | Self::ServerNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        let err = HubError::ToolNotFound {
            server: "s".into(),
            tool: "t".into(),
            available: vec!["a".into()],
        };
        assert_eq!(err.code(), "TOOL_NOT_FOUND");
        assert_eq!(err.data()["available"], json!(["a"]));
    }

    #[test]
    fn test_caller_errors() {
        assert!(HubError::ServerNotFound("x".into()).is_caller_error());
        assert!(!HubError::ConnectionFailed {
            server: "x".into(),
            reason: "boom".into()
        }
        .is_caller_error());
    }

    #[test]
    fn test_unauthorized_data_carries_url() {
        let err = HubError::Unauthorized {
            server: "notes".into(),
            authorization_url: Some("https://auth.example.com/authorize?x=1".into()),
        };
        assert_eq!(err.code(), "UNAUTHORIZED");
        assert_eq!(
            err.data()["authorizationUrl"],
            json!("https://auth.example.com/authorize?x=1")
        );
    }
}
