//! Dev-mode file watching for stdio servers.
//!
//! Watches `dev.cwd` recursively, filters events against the configured
//! glob patterns, debounces a burst of writes, and fires a restart trigger.
//! The supervisor owns the receiving side and performs the actual
//! disconnect/connect cycle.

use std::path::Path;
use std::time::Duration;

use glob::Pattern;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

use mcphub_core::DevConfig;

/// Quiet period before a restart fires.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Handle keeping the dev watcher alive; dropping it stops watching and
/// cancels any pending restart.
pub struct DevWatcher {
    _watcher: RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl DevWatcher {
    /// Start watching. Every debounced change sends one unit on `restarts`.
    pub fn spawn(
        server: &str,
        dev: &DevConfig,
        restarts: mpsc::Sender<()>,
    ) -> Result<Self, String> {
        let patterns: Vec<Pattern> = dev
            .watch
            .iter()
            .filter_map(|raw| match Pattern::new(raw) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    error!(server = %server, pattern = %raw, error = %e, "[DevWatch] Bad glob, skipping");
                    None
                }
            })
            .collect();
        if patterns.is_empty() {
            return Err(format!("server '{server}': no usable dev.watch patterns"));
        }

        let cwd = dev.cwd.clone();
        let (touched_tx, touched_rx) = mpsc::channel::<()>(16);
        let watcher_server = server.to_string();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    if event
                        .paths
                        .iter()
                        .any(|path| matches_any(&patterns, &cwd, path))
                    {
                        let _ = touched_tx.try_send(());
                    }
                }
                Err(e) => {
                    error!(server = %watcher_server, error = %e, "[DevWatch] Watch error");
                }
            }
        })
        .map_err(|e| format!("server '{server}': cannot create watcher: {e}"))?;

        watcher
            .watch(&dev.cwd, RecursiveMode::Recursive)
            .map_err(|e| {
                format!(
                    "server '{server}': cannot watch '{}': {e}",
                    dev.cwd.display()
                )
            })?;

        info!(
            server = %server,
            cwd = %dev.cwd.display(),
            patterns = dev.watch.len(),
            "[DevWatch] Watching for source changes"
        );

        let server = server.to_string();
        let task = tokio::spawn(debounce_loop(server, touched_rx, restarts));

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for DevWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Match an absolute event path against the patterns, relative to `cwd`.
fn matches_any(patterns: &[Pattern], cwd: &Path, path: &Path) -> bool {
    let relative = match path.strip_prefix(cwd) {
        Ok(relative) => relative,
        Err(_) => return false,
    };
    patterns.iter().any(|p| p.matches_path(relative))
}

async fn debounce_loop(server: String, mut touched: mpsc::Receiver<()>, restarts: mpsc::Sender<()>) {
    loop {
        if touched.recv().await.is_none() {
            return;
        }
        let mut deadline = Instant::now() + DEBOUNCE_WINDOW;
        loop {
            match tokio::time::timeout_at(deadline, touched.recv()).await {
                Ok(Some(())) => deadline = Instant::now() + DEBOUNCE_WINDOW,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        debug!(server = %server, "[DevWatch] Change settled, requesting restart");
        if restarts.send(()).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn patterns(raw: &[&str]) -> Vec<Pattern> {
        raw.iter().map(|p| Pattern::new(p).unwrap()).collect()
    }

    #[test]
    fn test_matches_relative_globs() {
        let cwd = PathBuf::from("/srv/app");
        let pats = patterns(&["src/**/*.ts"]);

        assert!(matches_any(&pats, &cwd, Path::new("/srv/app/src/index.ts")));
        assert!(matches_any(&pats, &cwd, Path::new("/srv/app/src/deep/nested/mod.ts")));
        assert!(!matches_any(&pats, &cwd, Path::new("/srv/app/dist/index.js")));
        assert!(!matches_any(&pats, &cwd, Path::new("/elsewhere/src/index.ts")));
    }

    #[test]
    fn test_double_star_spans_depth() {
        let cwd = PathBuf::from("/srv/app");
        let pats = patterns(&["**/*.py"]);
        assert!(matches_any(&pats, &cwd, Path::new("/srv/app/main.py")));
        assert!(matches_any(&pats, &cwd, Path::new("/srv/app/a/b/c/d.py")));
    }

    #[tokio::test]
    async fn test_restart_fires_after_file_change() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();

        let dev = DevConfig {
            enabled: true,
            watch: vec!["src/**/*.txt".into()],
            cwd: dir.path().to_path_buf(),
        };
        let (tx, mut rx) = mpsc::channel(4);
        let _watcher = DevWatcher::spawn("dev-server", &dev, tx).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(dir.path().join("src/a.txt"), "change").unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no restart trigger")
            .expect("channel closed");
    }

    #[test]
    fn test_no_usable_patterns_is_an_error() {
        let dev = DevConfig {
            enabled: true,
            watch: vec![],
            cwd: PathBuf::from("/"),
        };
        let (tx, _rx) = mpsc::channel(1);
        assert!(DevWatcher::spawn("s", &dev, tx).is_err());
    }
}
