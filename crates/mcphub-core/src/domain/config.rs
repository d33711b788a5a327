//! Declarative server configuration.
//!
//! A hub configuration is a map from server name to [`ServerConfig`]. The
//! transport kind is never written explicitly by users; it is inferred from
//! the presence of `command` (stdio) versus `url` (remote) and fixed after
//! validation.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{HubError, HubResult};

/// Transport kind, derived from the config shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerKind {
    Stdio,
    Remote,
}

impl ServerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Remote => "remote",
        }
    }
}

/// Dev-mode settings for stdio servers: watch source globs and restart the
/// child on change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Glob patterns, relative to `cwd`. `**` matches arbitrary depth.
    #[serde(default)]
    pub watch: Vec<String>,
    /// Absolute path the patterns are resolved against.
    pub cwd: PathBuf,
}

fn default_true() -> bool {
    true
}

/// Configuration of a single managed server.
///
/// Exactly one of `command` / `url` must be set; validation rejects
/// everything else. `env` values may be `null`, which means "inherit the
/// like-named process environment variable" at resolution time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub disabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<DevConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Optional explicit transport type. Accepted for compatibility with
    /// configs written for other launchers; must agree with the inferred
    /// kind when present.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub transport_type: Option<ServerKind>,

    /// Unknown fields are preserved round-trip but never significant to
    /// diffing.
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl ServerConfig {
    /// Infer the transport kind. Errors when both or neither of
    /// `command` / `url` are present.
    pub fn kind(&self) -> HubResult<ServerKind> {
        match (&self.command, &self.url) {
            (Some(_), None) => Ok(ServerKind::Stdio),
            (None, Some(_)) => Ok(ServerKind::Remote),
            (Some(_), Some(_)) => Err(HubError::ConfigInvalid(
                "'command' and 'url' are mutually exclusive".into(),
            )),
            (None, None) => Err(HubError::ConfigInvalid(
                "one of 'command' or 'url' is required".into(),
            )),
        }
    }

    /// Validate the per-server shape. `name` is only used for error messages.
    pub fn validate(&self, name: &str) -> HubResult<()> {
        let kind = self
            .kind()
            .map_err(|e| HubError::ConfigInvalid(format!("server '{name}': {e}")))?;

        if let Some(declared) = self.transport_type {
            if declared != kind {
                return Err(HubError::ConfigInvalid(format!(
                    "server '{name}': declared type '{}' does not match inferred kind '{}'",
                    declared.as_str(),
                    kind.as_str()
                )));
            }
        }

        match kind {
            ServerKind::Stdio => {
                if self.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
                    return Err(HubError::ConfigInvalid(format!(
                        "server '{name}': 'command' must not be empty"
                    )));
                }
                if !self.headers.is_empty() {
                    return Err(HubError::ConfigInvalid(format!(
                        "server '{name}': 'headers' is only valid for remote servers"
                    )));
                }
            }
            ServerKind::Remote => {
                let raw = self.url.as_deref().unwrap_or_default();
                let parsed = url::Url::parse(raw).map_err(|e| {
                    HubError::ConfigInvalid(format!("server '{name}': invalid url '{raw}': {e}"))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(HubError::ConfigInvalid(format!(
                        "server '{name}': url must be http or https"
                    )));
                }
                if self.dev.is_some() {
                    return Err(HubError::ConfigInvalid(format!(
                        "server '{name}': 'dev' is only valid for stdio servers"
                    )));
                }
                if !self.args.is_empty() || !self.env.is_empty() {
                    return Err(HubError::ConfigInvalid(format!(
                        "server '{name}': 'args' and 'env' are only valid for stdio servers"
                    )));
                }
            }
        }

        if let Some(dev) = &self.dev {
            if !dev.cwd.is_absolute() {
                return Err(HubError::ConfigInvalid(format!(
                    "server '{name}': 'dev.cwd' must be an absolute path"
                )));
            }
        }

        Ok(())
    }
}

/// The full declarative configuration: `mcpServers` keyed by server name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
}

impl HubConfig {
    /// Parse and validate a configuration value.
    pub fn from_value(value: Value) -> HubResult<Self> {
        if value.get("mcpServers").map(Value::is_object) != Some(true) {
            return Err(HubError::ConfigInvalid(
                "'mcpServers' must be a mapping of server name to config".into(),
            ));
        }
        let config: HubConfig = serde_json::from_value(value)
            .map_err(|e| HubError::ConfigInvalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every server entry.
    pub fn validate(&self) -> HubResult<()> {
        for (name, server) in &self.mcp_servers {
            if name.trim().is_empty() {
                return Err(HubError::ConfigInvalid("server name must not be empty".into()));
            }
            server.validate(name)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.mcp_servers.get(name)
    }

    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.mcp_servers.keys().map(String::as_str)
    }
}
