//! On-disk persistence for OAuth state.
//!
//! Each server gets its own directory under the hub data dir holding
//! `client.json` (registration + discovered metadata) and `tokens.json`.
//! Token files are written with owner-only permissions; writes are
//! serialized per server name.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use super::discovery::OAuthMetadata;
use super::token::OAuthToken;

/// Persisted client registration plus the metadata it was registered
/// against, so refresh works without re-discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredClient {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub issuer: String,
    pub metadata: OAuthMetadata,
}

/// File-backed OAuth storage, one subdirectory per server.
pub struct AuthStorage {
    base_dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl AuthStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn server_dir(&self, server: &str) -> PathBuf {
        // Server names come from user config; keep the path component tame.
        let safe: String = server
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.base_dir.join(safe)
    }

    fn lock_for(&self, server: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub async fn load_client(&self, server: &str) -> Option<StoredClient> {
        self.read_json(server, "client.json").await
    }

    pub async fn save_client(&self, server: &str, client: &StoredClient) -> Result<()> {
        self.write_json(server, "client.json", client).await
    }

    pub async fn load_tokens(&self, server: &str) -> Option<OAuthToken> {
        self.read_json(server, "tokens.json").await
    }

    pub async fn save_tokens(&self, server: &str, tokens: &OAuthToken) -> Result<()> {
        self.write_json(server, "tokens.json", tokens).await
    }

    /// Drop tokens but keep the client registration for re-auth.
    pub async fn clear_tokens(&self, server: &str) -> Result<()> {
        let lock = self.lock_for(server);
        let _guard = lock.lock().await;
        let path = self.server_dir(server).join("tokens.json");
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("removing token file"),
        }
    }

    async fn read_json<T: DeserializeOwned>(&self, server: &str, file: &str) -> Option<T> {
        let path = self.server_dir(server).join(file);
        let raw = tokio::fs::read_to_string(&path).await.ok()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "[AuthStorage] Ignoring unreadable file");
                None
            }
        }
    }

    async fn write_json<T: Serialize>(&self, server: &str, file: &str, value: &T) -> Result<()> {
        let lock = self.lock_for(server);
        let _guard = lock.lock().await;

        let dir = self.server_dir(server);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        let path = dir.join(file);
        let body = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("setting permissions on {}", path.display()))?;
        }

        debug!(path = %path.display(), "[AuthStorage] Wrote");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> OAuthMetadata {
        OAuthMetadata {
            issuer: "https://auth.example.com".into(),
            authorization_endpoint: "https://auth.example.com/authorize".into(),
            token_endpoint: "https://auth.example.com/token".into(),
            registration_endpoint: Some("https://auth.example.com/register".into()),
            revocation_endpoint: None,
            response_types_supported: vec!["code".into()],
            grant_types_supported: vec![],
            scopes_supported: vec![],
            code_challenge_methods_supported: vec!["S256".into()],
        }
    }

    #[tokio::test]
    async fn test_client_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AuthStorage::new(dir.path());

        assert!(storage.load_client("notes").await.is_none());

        let client = StoredClient {
            client_id: "abc".into(),
            client_secret: None,
            issuer: "https://auth.example.com".into(),
            metadata: metadata(),
        };
        storage.save_client("notes", &client).await.unwrap();

        let loaded = storage.load_client("notes").await.unwrap();
        assert_eq!(loaded.client_id, "abc");
        assert_eq!(loaded.metadata.token_endpoint, "https://auth.example.com/token");
    }

    #[tokio::test]
    async fn test_tokens_roundtrip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AuthStorage::new(dir.path());

        let token = OAuthToken {
            access_token: "at".into(),
            token_type: "Bearer".into(),
            refresh_token: Some("rt".into()),
            expires_at: None,
            scope: None,
        };
        storage.save_tokens("notes", &token).await.unwrap();
        assert_eq!(storage.load_tokens("notes").await.unwrap().access_token, "at");

        storage.clear_tokens("notes").await.unwrap();
        assert!(storage.load_tokens("notes").await.is_none());
        // Clearing twice is fine.
        storage.clear_tokens("notes").await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_token_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = AuthStorage::new(dir.path());
        let token = OAuthToken {
            access_token: "at".into(),
            token_type: "Bearer".into(),
            refresh_token: None,
            expires_at: None,
            scope: None,
        };
        storage.save_tokens("notes", &token).await.unwrap();

        let path = dir.path().join("notes").join("tokens.json");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_server_names_are_sanitized_into_paths() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AuthStorage::new(dir.path());
        let token = OAuthToken {
            access_token: "at".into(),
            token_type: "Bearer".into(),
            refresh_token: None,
            expires_at: None,
            scope: None,
        };
        storage.save_tokens("../evil/name", &token).await.unwrap();
        assert!(dir.path().join("___evil_name").join("tokens.json").exists());
    }
}
