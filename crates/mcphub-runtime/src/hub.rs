//! Hub core: owns the supervisors, applies configuration diffs, and exposes
//! the top-level operations the HTTP collaborator calls.
//!
//! The hub is one long-lived object per process, passed into collaborators
//! rather than reached through globals. Supervisors reference the hub only
//! through the event bus, never by ownership.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mcphub_core::{
    CommandExecutor, ConfigStore, ConfigWatcher, EventBus, EventSender, HubError, HubEvent,
    HubResult, HubState, LoadOutcome, ServerConfig, ShellExecutor,
};

use crate::marketplace::{Marketplace, NullMarketplace};
use crate::oauth::AuthStorage;
use crate::subscriptions::{
    AutoShutdown, ShutdownReason, SubscriberSink, SubscriptionFilter, SubscriptionLayer,
};
use crate::supervisor::{ServerInfo, ServerSupervisor, SupervisorDeps, DEFAULT_CONNECT_TIMEOUT};

/// Hub-level configuration knobs.
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Directory for hub-owned per-server state (OAuth registrations,
    /// tokens).
    pub data_dir: PathBuf,
    /// Redirect prefix the hub serves for OAuth callbacks.
    pub callback_base_url: String,
    /// Watch the config file (when the source is a file) and hot-reload.
    pub watch_config: bool,
    pub auto_shutdown: AutoShutdown,
    pub connect_timeout: Duration,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".mcp-hub"),
            callback_base_url: "http://127.0.0.1:37650/oauth/callback".to_string(),
            watch_config: true,
            auto_shutdown: AutoShutdown::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

pub struct McpHub {
    options: HubOptions,
    store: Arc<ConfigStore>,
    bus: EventBus,
    events: EventSender,
    subscriptions: Arc<SubscriptionLayer>,
    marketplace: Arc<dyn Marketplace>,
    executor: Arc<dyn CommandExecutor>,
    auth_storage: Arc<AuthStorage>,
    supervisors: RwLock<HashMap<String, Arc<ServerSupervisor>>>,
    state: parking_lot::RwLock<HubState>,
    watcher: parking_lot::Mutex<Option<ConfigWatcher>>,
    watcher_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl McpHub {
    pub fn new(store: ConfigStore, options: HubOptions) -> Arc<Self> {
        Self::with_collaborators(
            store,
            options,
            Arc::new(NullMarketplace),
            Arc::new(ShellExecutor::new()),
        )
    }

    pub fn with_collaborators(
        store: ConfigStore,
        options: HubOptions,
        marketplace: Arc<dyn Marketplace>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Arc<Self> {
        let bus = EventBus::new();
        let events = bus.sender();
        let subscriptions = SubscriptionLayer::new(events.clone(), options.auto_shutdown.clone());
        subscriptions.start(&bus);
        let auth_storage = Arc::new(AuthStorage::new(&options.data_dir));

        Arc::new(Self {
            options,
            store: Arc::new(store),
            bus,
            events,
            subscriptions,
            marketplace,
            executor,
            auth_storage,
            supervisors: RwLock::new(HashMap::new()),
            state: parking_lot::RwLock::new(HubState::Starting),
            watcher: parking_lot::Mutex::new(None),
            watcher_task: parking_lot::Mutex::new(None),
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> HubState {
        *self.state.read()
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionLayer> {
        &self.subscriptions
    }

    /// Register an external subscriber.
    pub fn subscribe(
        &self,
        filter: SubscriptionFilter,
        sink: Arc<dyn SubscriberSink>,
    ) -> uuid::Uuid {
        self.subscriptions.subscribe(filter, sink)
    }

    pub fn unsubscribe(&self, id: uuid::Uuid) {
        self.subscriptions.unsubscribe(id);
    }

    /// Load the configuration, build supervisors, connect enabled servers
    /// in parallel, and begin watching the source file. One failing server
    /// never aborts the batch.
    pub async fn initialize(self: &Arc<Self>) -> HubResult<()> {
        self.set_state(HubState::Starting);

        let outcome = match self.store.load().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_state(HubState::Error);
                return Err(e);
            }
        };

        self.build_supervisors(&outcome.config.mcp_servers).await;
        self.connect_enabled().await;

        if self.options.watch_config && self.store.path().is_some() {
            self.spawn_config_watch();
        }

        self.set_state(HubState::Ready);
        Ok(())
    }

    /// Tear everything down concurrently; one slow server cannot block the
    /// others.
    pub async fn stop(self: &Arc<Self>) {
        self.set_state(HubState::Stopping);
        *self.watcher.lock() = None;
        if let Some(task) = self.watcher_task.lock().take() {
            task.abort();
        }

        let supervisors: Vec<Arc<ServerSupervisor>> = {
            let mut map = self.supervisors.write().await;
            map.drain().map(|(_, sup)| sup).collect()
        };
        join_all(supervisors.iter().map(|sup| sup.stop(false))).await;

        self.set_state(HubState::Stopped);
        self.subscriptions.request_shutdown(ShutdownReason::Clean);
    }

    /// Reload the configuration from scratch and re-materialize every
    /// supervisor.
    pub async fn restart(self: &Arc<Self>) -> HubResult<()> {
        self.set_state(HubState::Restarting);

        let supervisors: Vec<Arc<ServerSupervisor>> = {
            let mut map = self.supervisors.write().await;
            map.drain().map(|(_, sup)| sup).collect()
        };
        join_all(supervisors.iter().map(|sup| sup.stop(false))).await;

        let outcome = match self.store.load().await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.set_state(HubState::Error);
                return Err(e);
            }
        };
        self.build_supervisors(&outcome.config.mcp_servers).await;
        self.connect_enabled().await;

        self.set_state(HubState::Restarted);
        self.set_state(HubState::Ready);
        Ok(())
    }

    /// Apply one configuration change. Emits `configChangeDetected` always,
    /// and the `importantConfigChanged` / `importantConfigChangeHandled`
    /// pair around the actual work for significant diffs.
    pub async fn handle_config_change(self: &Arc<Self>, change: LoadOutcome) {
        let diff = change.diff;
        let significant = diff.is_significant();
        self.events
            .emit(HubEvent::ConfigChangeDetected { significant });
        if !significant {
            debug!("[Hub] Configuration change without significant differences");
            return;
        }

        info!(
            added = diff.added.len(),
            removed = diff.removed.len(),
            modified = diff.modified.len(),
            "[Hub] Applying configuration change"
        );
        self.events
            .emit(HubEvent::ImportantConfigChanged { diff: diff.clone() });

        let mut work: Vec<futures::future::BoxFuture<'_, ()>> = Vec::new();

        for name in &diff.added {
            let Some(config) = change.config.get(name) else {
                continue;
            };
            let supervisor = self.insert_supervisor(name, config.clone()).await;
            let name = name.clone();
            work.push(Box::pin(async move {
                if supervisor.config().await.disabled {
                    return;
                }
                if let Err(e) = supervisor.connect(None).await {
                    warn!(server = %name, error = %e, "[Hub] Added server failed to connect");
                }
            }));
        }

        for name in &diff.removed {
            let supervisor = self.supervisors.write().await.remove(name);
            if let Some(supervisor) = supervisor {
                let name = name.clone();
                work.push(Box::pin(async move {
                    supervisor.stop(false).await;
                    debug!(server = %name, "[Hub] Removed server stopped");
                }));
            }
        }

        for name in &diff.modified {
            let Some(new_config) = change.config.get(name).cloned() else {
                continue;
            };
            let Some(supervisor) = self.supervisors.read().await.get(name).cloned() else {
                continue;
            };
            let only_disabled = diff
                .details
                .get(name)
                .is_some_and(|detail| detail.only_disabled_flipped());
            let name = name.clone();
            work.push(Box::pin(async move {
                let result = if only_disabled {
                    if new_config.disabled {
                        supervisor.stop(true).await;
                        Ok(())
                    } else {
                        supervisor.start().await.map(|_| ())
                    }
                } else if new_config.disabled {
                    supervisor.replace_config(new_config).await;
                    supervisor.stop(true).await;
                    Ok(())
                } else {
                    // Teardown happens inside connect, strictly before the
                    // new transport comes up.
                    supervisor.connect(Some(new_config)).await
                };
                if let Err(e) = result {
                    warn!(server = %name, error = %e, "[Hub] Reconfiguring server failed");
                }
            }));
        }

        join_all(work).await;
        self.events
            .emit(HubEvent::ImportantConfigChangeHandled { diff });
    }

    // ── thin forwarders ──

    pub async fn start_server(&self, name: &str) -> HubResult<ServerInfo> {
        self.supervisor(name).await?.start().await
    }

    pub async fn stop_server(&self, name: &str, disable: bool) -> HubResult<ServerInfo> {
        Ok(self.supervisor(name).await?.stop(disable).await)
    }

    pub async fn refresh_server(&self, name: &str) -> HubResult<ServerInfo> {
        let supervisor = self.supervisor(name).await?;
        supervisor.update_capabilities(None).await?;
        Ok(supervisor.get_server_info().await)
    }

    pub async fn refresh_all_servers(&self) -> Vec<ServerInfo> {
        let supervisors = self.all_supervisors().await;
        join_all(supervisors.iter().map(|sup| async {
            if let Err(e) = sup.update_capabilities(None).await {
                debug!(server = %sup.name(), error = %e, "[Hub] Refresh skipped");
            }
            sup.get_server_info().await
        }))
        .await
    }

    pub async fn call_tool(&self, name: &str, tool: &str, args: Option<Value>) -> HubResult<Value> {
        self.supervisor(name).await?.call_tool(tool, args).await
    }

    pub async fn read_resource(&self, name: &str, uri: &str) -> HubResult<Value> {
        self.supervisor(name).await?.read_resource(uri).await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        prompt: &str,
        args: Option<Value>,
    ) -> HubResult<Value> {
        self.supervisor(name).await?.get_prompt(prompt, args).await
    }

    pub async fn authorize_server(&self, name: &str) -> HubResult<String> {
        self.supervisor(name).await?.authorize().await
    }

    pub async fn handle_auth_callback(&self, name: &str, code: &str) -> HubResult<()> {
        self.supervisor(name).await?.handle_auth_callback(code).await
    }

    pub async fn get_server_info(&self, name: &str) -> HubResult<ServerInfo> {
        Ok(self.supervisor(name).await?.get_server_info().await)
    }

    /// The configuration a server currently runs with.
    pub async fn get_server_config(&self, name: &str) -> HubResult<ServerConfig> {
        Ok(self.supervisor(name).await?.config().await)
    }

    pub async fn get_all_server_statuses(&self) -> Vec<ServerInfo> {
        let supervisors = self.all_supervisors().await;
        join_all(supervisors.iter().map(|sup| sup.get_server_info())).await
    }

    pub async fn server_names(&self) -> Vec<String> {
        self.supervisors.read().await.keys().cloned().collect()
    }

    // ── internals ──

    fn set_state(&self, state: HubState) {
        *self.state.write() = state;
        info!(state = state.as_str(), "[Hub] State changed");
        self.events.emit(HubEvent::HubStateChanged { state });
    }

    fn supervisor_deps(&self) -> SupervisorDeps {
        SupervisorDeps {
            events: self.events.clone(),
            marketplace: self.marketplace.clone(),
            executor: self.executor.clone(),
            auth_storage: self.auth_storage.clone(),
            callback_base_url: self.options.callback_base_url.clone(),
            connect_timeout: self.options.connect_timeout,
        }
    }

    async fn supervisor(&self, name: &str) -> HubResult<Arc<ServerSupervisor>> {
        self.supervisors
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| HubError::ServerNotFound(name.to_string()))
    }

    async fn all_supervisors(&self) -> Vec<Arc<ServerSupervisor>> {
        self.supervisors.read().await.values().cloned().collect()
    }

    async fn insert_supervisor(
        &self,
        name: &str,
        config: ServerConfig,
    ) -> Arc<ServerSupervisor> {
        let supervisor = ServerSupervisor::new(name, config, self.supervisor_deps());
        self.supervisors
            .write()
            .await
            .insert(name.to_string(), supervisor.clone());
        supervisor
    }

    async fn build_supervisors(
        &self,
        servers: &std::collections::BTreeMap<String, ServerConfig>,
    ) {
        let mut map = self.supervisors.write().await;
        map.clear();
        for (name, config) in servers {
            map.insert(
                name.clone(),
                ServerSupervisor::new(name, config.clone(), self.supervisor_deps()),
            );
        }
        info!(servers = map.len(), "[Hub] Supervisors created");
    }

    async fn connect_enabled(&self) {
        let supervisors = self.all_supervisors().await;
        let results = join_all(supervisors.iter().map(|sup| async move {
            if sup.config().await.disabled {
                return (sup.name().to_string(), Ok(()));
            }
            (sup.name().to_string(), sup.connect(None).await)
        }))
        .await;

        let mut connected = 0usize;
        for (name, result) in results {
            match result {
                Ok(()) => connected += 1,
                Err(e) => {
                    error!(server = %name, error = %e, "[Hub] Server failed to start");
                }
            }
        }
        info!(connected, total = supervisors.len(), "[Hub] Startup batch settled");
    }

    fn spawn_config_watch(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::channel::<LoadOutcome>(8);
        match ConfigWatcher::spawn(self.store.clone(), tx) {
            Ok(watcher) => {
                *self.watcher.lock() = Some(watcher);
                let hub = Arc::downgrade(self);
                let task = tokio::spawn(async move {
                    while let Some(change) = rx.recv().await {
                        let Some(hub) = hub.upgrade() else {
                            break;
                        };
                        hub.handle_config_change(change).await;
                    }
                });
                *self.watcher_task.lock() = Some(task);
            }
            Err(e) => {
                warn!(error = %e, "[Hub] Config watching unavailable");
            }
        }
    }
}
