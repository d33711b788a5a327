//! Configuration store: load, validate, and diff the declarative server map.
//!
//! A store wraps either an in-memory value or a path on disk. Every
//! successful [`ConfigStore::load`] validates the source and returns the
//! parsed config together with the diff against the previously accepted
//! snapshot, which the hub turns into start/stop/reconnect operations.

pub mod watcher;

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::domain::config::HubConfig;
use crate::domain::diff::ConfigDiff;
use crate::error::{HubError, HubResult};

/// Where the configuration comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A fixed in-memory value; `load()` re-validates but never re-reads.
    Inline(Value),
    /// A JSON file on disk, re-read on every `load()`.
    File(PathBuf),
}

/// Result of one load: the accepted config and its diff against the previous
/// snapshot. The first load diffs against the empty config, so every server
/// shows up as `added`.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub config: HubConfig,
    pub diff: ConfigDiff,
}

/// Validating loader with snapshot-based diffing.
pub struct ConfigStore {
    source: ConfigSource,
    snapshot: RwLock<HubConfig>,
}

impl ConfigStore {
    pub fn from_value(value: Value) -> Self {
        Self {
            source: ConfigSource::Inline(value),
            snapshot: RwLock::new(HubConfig::default()),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ConfigSource::File(path.into()),
            snapshot: RwLock::new(HubConfig::default()),
        }
    }

    /// The backing file, when the source is one.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ConfigSource::File(path) => Some(path),
            ConfigSource::Inline(_) => None,
        }
    }

    /// The last accepted configuration.
    pub fn snapshot(&self) -> HubConfig {
        self.snapshot.read().clone()
    }

    /// Read, parse, and validate the source, then diff against the previous
    /// snapshot. A validation failure leaves the snapshot untouched, so a
    /// broken edit never disturbs running servers.
    pub async fn load(&self) -> HubResult<LoadOutcome> {
        let value = match &self.source {
            ConfigSource::Inline(value) => value.clone(),
            ConfigSource::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    HubError::ConfigInvalid(format!(
                        "cannot read config file '{}': {e}",
                        path.display()
                    ))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    HubError::ConfigInvalid(format!(
                        "cannot parse config file '{}': {e}",
                        path.display()
                    ))
                })?
            }
        };

        let config = HubConfig::from_value(value)?;

        let diff = {
            let mut snapshot = self.snapshot.write();
            let diff = ConfigDiff::compute(&snapshot, &config);
            *snapshot = config.clone();
            diff
        };

        debug!(
            servers = config.mcp_servers.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            modified = diff.modified.len(),
            "[ConfigStore] Configuration loaded"
        );

        Ok(LoadOutcome { config, diff })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn test_first_load_reports_everything_added() {
        let store = ConfigStore::from_value(json!({
            "mcpServers": {
                "a": { "command": "a-server" },
                "b": { "url": "https://example.com/mcp" }
            }
        }));

        let outcome = store.load().await.unwrap();
        assert_eq!(outcome.diff.added.len(), 2);
        assert!(outcome.diff.removed.is_empty());
    }

    #[tokio::test]
    async fn test_reload_of_identical_source_is_empty_diff() {
        let store = ConfigStore::from_value(json!({
            "mcpServers": { "a": { "command": "a-server" } }
        }));

        store.load().await.unwrap();
        let outcome = store.load().await.unwrap();
        assert!(!outcome.diff.is_significant());
        assert!(outcome.diff.unchanged.contains("a"));
    }

    #[tokio::test]
    async fn test_file_roundtrip_and_rewrite() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "mcpServers": {{ "a": {{ "command": "a-server" }} }} }}"#
        )
        .unwrap();
        file.flush().unwrap();

        let store = ConfigStore::from_file(file.path());
        let first = store.load().await.unwrap();
        assert!(first.diff.added.contains("a"));

        std::fs::write(
            file.path(),
            r#"{ "mcpServers": { "b": { "command": "b-server" } } }"#,
        )
        .unwrap();

        let second = store.load().await.unwrap();
        assert!(second.diff.added.contains("b"));
        assert!(second.diff.removed.contains("a"));
    }

    #[tokio::test]
    async fn test_invalid_source_leaves_snapshot_untouched() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "mcpServers": {{ "a": {{ "command": "a-server" }} }} }}"#
        )
        .unwrap();
        file.flush().unwrap();

        let store = ConfigStore::from_file(file.path());
        store.load().await.unwrap();

        std::fs::write(file.path(), "{ not json").unwrap();
        let err = store.load().await.unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");

        assert!(store.snapshot().mcp_servers.contains_key("a"));
    }

    #[tokio::test]
    async fn test_schema_violation_is_config_invalid() {
        let store = ConfigStore::from_value(json!({
            "mcpServers": {
                "bad": { "command": "x", "url": "https://example.com" }
            }
        }));
        let err = store.load().await.unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }
}
