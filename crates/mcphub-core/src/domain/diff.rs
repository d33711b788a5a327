//! Semantic diffing between two hub configurations.
//!
//! Only a fixed set of fields is significant: changes anywhere else (for
//! example `description`) are detected but yield an empty modified set, so
//! the hub never restarts a server for a cosmetic edit.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::config::{HubConfig, ServerConfig};

/// Fields whose change forces a reconnect (or start/stop for `disabled`).
pub const SIGNIFICANT_FIELDS: &[&str] = &[
    "command", "args", "env", "disabled", "url", "headers", "dev", "name",
];

/// Per-server detail of a modification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffDetail {
    #[serde(rename = "modifiedFields")]
    pub modified_fields: Vec<String>,
    #[serde(rename = "oldValues")]
    pub old_values: BTreeMap<String, Value>,
    #[serde(rename = "newValues")]
    pub new_values: BTreeMap<String, Value>,
}

impl DiffDetail {
    /// True when the only significant change is the `disabled` flag. The hub
    /// can then start/stop instead of tearing the connection down.
    pub fn only_disabled_flipped(&self) -> bool {
        self.modified_fields.as_slice() == ["disabled"]
    }
}

/// Result of diffing two configurations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDiff {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
    pub details: BTreeMap<String, DiffDetail>,
}

impl ConfigDiff {
    /// Compute the diff from `old` to `new`.
    pub fn compute(old: &HubConfig, new: &HubConfig) -> Self {
        let mut diff = ConfigDiff::default();

        for (name, new_server) in &new.mcp_servers {
            match old.mcp_servers.get(name) {
                None => {
                    diff.added.insert(name.clone());
                }
                Some(old_server) => {
                    let detail = compare_servers(old_server, new_server);
                    if detail.modified_fields.is_empty() {
                        diff.unchanged.insert(name.clone());
                    } else {
                        diff.modified.insert(name.clone());
                        diff.details.insert(name.clone(), detail);
                    }
                }
            }
        }

        for name in old.mcp_servers.keys() {
            if !new.mcp_servers.contains_key(name) {
                diff.removed.insert(name.clone());
            }
        }

        diff
    }

    /// A diff is significant when it requires touching any server.
    pub fn is_significant(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.modified.is_empty()
    }

    /// Total number of servers the hub has to act on.
    pub fn affected_count(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }
}

fn significant_value(server: &ServerConfig, field: &str) -> Value {
    match field {
        "command" => serde_json::to_value(&server.command),
        "args" => serde_json::to_value(&server.args),
        "env" => serde_json::to_value(&server.env),
        "disabled" => serde_json::to_value(server.disabled),
        "url" => serde_json::to_value(&server.url),
        "headers" => serde_json::to_value(&server.headers),
        "dev" => serde_json::to_value(&server.dev),
        // The name is the map key; it cannot differ for the same entry, but
        // it stays in the significant set so renames always read as
        // remove + add.
        "name" => Ok(Value::Null),
        _ => Ok(Value::Null),
    }
    .unwrap_or(Value::Null)
}

fn compare_servers(old: &ServerConfig, new: &ServerConfig) -> DiffDetail {
    let mut detail = DiffDetail::default();
    for field in SIGNIFICANT_FIELDS {
        let old_value = significant_value(old, field);
        let new_value = significant_value(new, field);
        if old_value != new_value {
            detail.modified_fields.push((*field).to_string());
            detail.old_values.insert((*field).to_string(), old_value);
            detail.new_values.insert((*field).to_string(), new_value);
        }
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config(v: serde_json::Value) -> HubConfig {
        HubConfig::from_value(v).unwrap()
    }

    #[test]
    fn test_added_removed_modified_unchanged() {
        let old = config(json!({
            "mcpServers": {
                "a": { "command": "a-server" },
                "b": { "command": "b-server", "disabled": true },
                "c": { "command": "c-server" }
            }
        }));
        let new = config(json!({
            "mcpServers": {
                "b": { "command": "b-server", "disabled": false },
                "c": { "command": "c-server" },
                "d": { "url": "https://example.com/mcp" }
            }
        }));

        let diff = ConfigDiff::compute(&old, &new);
        assert_eq!(diff.added.iter().collect::<Vec<_>>(), vec!["d"]);
        assert_eq!(diff.removed.iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(diff.modified.iter().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(diff.unchanged.iter().collect::<Vec<_>>(), vec!["c"]);
        assert!(diff.is_significant());
    }

    #[test]
    fn test_names_partition_both_sets() {
        let old = config(json!({
            "mcpServers": { "a": { "command": "x" }, "b": { "command": "y" } }
        }));
        let new = config(json!({
            "mcpServers": { "b": { "command": "y2" }, "c": { "command": "z" } }
        }));
        let diff = ConfigDiff::compute(&old, &new);

        let mut all: BTreeSet<String> = BTreeSet::new();
        all.extend(diff.added.iter().cloned());
        all.extend(diff.removed.iter().cloned());
        all.extend(diff.modified.iter().cloned());
        all.extend(diff.unchanged.iter().cloned());
        let expected: BTreeSet<String> =
            ["a", "b", "c"].into_iter().map(String::from).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_description_change_is_insignificant() {
        let old = config(json!({
            "mcpServers": { "a": { "command": "x", "description": "old" } }
        }));
        let new = config(json!({
            "mcpServers": { "a": { "command": "x", "description": "new" } }
        }));
        let diff = ConfigDiff::compute(&old, &new);
        assert!(!diff.is_significant());
        assert!(diff.unchanged.contains("a"));
    }

    #[test]
    fn test_deep_equality_on_env() {
        let old = config(json!({
            "mcpServers": { "a": { "command": "x", "env": { "K": "1", "L": null } } }
        }));
        let same = config(json!({
            "mcpServers": { "a": { "command": "x", "env": { "L": null, "K": "1" } } }
        }));
        assert!(!ConfigDiff::compute(&old, &same).is_significant());

        let changed = config(json!({
            "mcpServers": { "a": { "command": "x", "env": { "K": "2", "L": null } } }
        }));
        let diff = ConfigDiff::compute(&old, &changed);
        assert_eq!(diff.details["a"].modified_fields, vec!["env"]);
        assert_eq!(diff.details["a"].old_values["env"], json!({ "K": "1", "L": null }));
        assert_eq!(diff.details["a"].new_values["env"], json!({ "K": "2", "L": null }));
    }

    #[test]
    fn test_only_disabled_flip_detected() {
        let old = config(json!({
            "mcpServers": { "a": { "command": "x", "disabled": true } }
        }));
        let new = config(json!({
            "mcpServers": { "a": { "command": "x", "disabled": false } }
        }));
        let diff = ConfigDiff::compute(&old, &new);
        assert!(diff.details["a"].only_disabled_flipped());
    }

    #[test]
    fn test_args_order_is_significant() {
        let old = config(json!({
            "mcpServers": { "a": { "command": "x", "args": ["-a", "-b"] } }
        }));
        let new = config(json!({
            "mcpServers": { "a": { "command": "x", "args": ["-b", "-a"] } }
        }));
        assert!(ConfigDiff::compute(&old, &new).is_significant());
    }
}
