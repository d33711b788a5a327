//! File watching for the configuration store.
//!
//! Watches the directory containing the config file and coalesces rapid
//! writes behind a short stability window before re-loading, so an editor
//! that truncates-then-writes (or writes in several chunks) produces one
//! reload instead of several. Watch errors are reported and the watcher
//! keeps running.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{ConfigStore, LoadOutcome};
use crate::error::{HubError, HubResult};

/// Coalescing window: a reload runs only after the file has been quiet this
/// long.
pub const DEFAULT_STABILITY_WINDOW: Duration = Duration::from_millis(200);

/// A change emitted after a successful reload of the watched file.
pub type ConfigChanged = LoadOutcome;

/// Handle keeping the file watcher alive. Dropping it stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching the store's backing file; reload outcomes are sent on
    /// `changes`. Errors when the store has no file source.
    pub fn spawn(
        store: Arc<ConfigStore>,
        changes: mpsc::Sender<ConfigChanged>,
    ) -> HubResult<Self> {
        Self::spawn_with_window(store, changes, DEFAULT_STABILITY_WINDOW)
    }

    pub fn spawn_with_window(
        store: Arc<ConfigStore>,
        changes: mpsc::Sender<ConfigChanged>,
        stability_window: Duration,
    ) -> HubResult<Self> {
        let path = store
            .path()
            .ok_or_else(|| {
                HubError::ConfigInvalid("cannot watch an in-memory configuration".into())
            })?
            .to_path_buf();
        let watch_dir = path
            .parent()
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path.file_name().map(|n| n.to_os_string());

        let (touched_tx, touched_rx) = mpsc::channel::<()>(16);

        // Editors commonly replace the file rather than writing in place, so
        // the parent directory is watched and events are filtered by name.
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let ours = event.paths.iter().any(|p| {
                        p.file_name().map(|n| n.to_os_string()) == file_name
                    });
                    if ours {
                        let _ = touched_tx.try_send(());
                    }
                }
                Err(e) => {
                    // Reported, not fatal: the watcher stays registered.
                    error!(error = %e, "[ConfigWatcher] File watch error");
                }
            }
        })
        .map_err(|e| HubError::ConfigInvalid(format!("cannot create file watcher: {e}")))?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                HubError::ConfigInvalid(format!(
                    "cannot watch '{}': {e}",
                    watch_dir.display()
                ))
            })?;

        info!(path = %path.display(), "[ConfigWatcher] Watching configuration file");

        let task = tokio::spawn(debounce_loop(
            store,
            changes,
            touched_rx,
            stability_window,
        ));

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Wait for the file to go quiet, then reload and emit.
async fn debounce_loop(
    store: Arc<ConfigStore>,
    changes: mpsc::Sender<ConfigChanged>,
    mut touched: mpsc::Receiver<()>,
    window: Duration,
) {
    loop {
        // Block until the first touch of a burst.
        if touched.recv().await.is_none() {
            debug!("[ConfigWatcher] Watch channel closed, stopping");
            return;
        }

        // Then absorb further touches until the window passes untouched.
        let mut deadline = Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, touched.recv()).await {
                Ok(Some(())) => deadline = Instant::now() + window,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        match store.load().await {
            Ok(outcome) => {
                debug!(
                    significant = outcome.diff.is_significant(),
                    "[ConfigWatcher] Configuration reloaded"
                );
                if changes.send(outcome).await.is_err() {
                    debug!("[ConfigWatcher] Change receiver gone, stopping");
                    return;
                }
            }
            Err(e) => {
                // A broken intermediate state; keep watching for the fix.
                warn!(error = %e, "[ConfigWatcher] Reload failed, keeping previous snapshot");
            }
        }
    }
}
