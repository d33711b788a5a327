//! Connection supervisor: owns and drives exactly one MCP server.
//!
//! The supervisor is a state machine over
//! `{disabled, disconnected, connecting, unauthorized, connected}`. It
//! resolves the configuration freshly on every connect attempt, selects the
//! transport (stdio, or streaming HTTP with SSE fallback for remote
//! servers), discovers capabilities, reacts to list-changed notifications,
//! and dispatches tool/resource/prompt requests with a shared guard
//! sequence. Operation entry points are serialized through one async mutex;
//! background work (notification handling, dev-mode restarts) re-enters
//! through the same entry points.

pub mod client;
pub mod dev_watch;

use std::sync::Arc;
use std::time::{Duration, Instant};

use rmcp::model::{CallToolRequestParam, GetPromptRequestParam, ReadResourceRequestParam};
use rmcp::service::Peer;
use rmcp::RoleClient;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mcphub_core::{
    CapabilityKind, CommandExecutor, ConnectionState, EventSender, HubError, HubEvent, HubResult,
    PlaceholderResolver, ResolverOptions, ServerCapabilities, ServerConfig, ServerKind,
};

use crate::marketplace::Marketplace;
use crate::oauth::{AuthStorage, OAuthProvider};
use crate::transport::{ConnectOutcome, ServerTransport, TransportFlavor};

use client::{HubClientHandler, ListChange, McpClient};
use dev_watch::DevWatcher;

/// Default budget for one transport connect + handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared collaborators every supervisor gets from the hub.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub events: EventSender,
    pub marketplace: Arc<dyn Marketplace>,
    pub executor: Arc<dyn CommandExecutor>,
    pub auth_storage: Arc<AuthStorage>,
    /// Redirect prefix served by the hub; the server name is appended.
    pub callback_base_url: String,
    pub connect_timeout: Duration,
}

/// Snapshot returned by `get_server_info()` and the hub status endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ServerKind>,
    pub state: ConnectionState,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    pub capabilities: ServerCapabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

struct SupervisorInner {
    config: ServerConfig,
    state: ConnectionState,
    error: Option<String>,
    started_at: Option<Instant>,
    /// True once the first connect has been attempted.
    initialized: bool,
    client: Option<McpClient>,
    capabilities: ServerCapabilities,
    oauth: Option<Arc<OAuthProvider>>,
    change_task: Option<JoinHandle<()>>,
    dev_watcher: Option<DevWatcher>,
    dev_task: Option<JoinHandle<()>>,
    /// Bumped on every teardown; in-flight capability updates from an older
    /// generation are discarded instead of written back.
    generation: u64,
}

/// How a successful `connect()` ended.
enum ConnectFlow {
    Connected,
    /// Parked in `unauthorized`, waiting for the callback. Not a failure.
    WaitingForAuthorization,
}

enum RemoteAttempt {
    Connected,
    Unauthorized(Arc<OAuthProvider>),
    Failed(String),
}

pub struct ServerSupervisor {
    name: String,
    deps: SupervisorDeps,
    inner: Mutex<SupervisorInner>,
}

impl ServerSupervisor {
    pub fn new(name: &str, config: ServerConfig, deps: SupervisorDeps) -> Arc<Self> {
        let disabled = config.disabled;
        Arc::new(Self {
            name: name.to_string(),
            deps,
            inner: Mutex::new(SupervisorInner {
                config,
                state: if disabled {
                    ConnectionState::Disabled
                } else {
                    ConnectionState::Disconnected
                },
                error: None,
                started_at: disabled.then(Instant::now),
                initialized: false,
                client: None,
                capabilities: ServerCapabilities::default(),
                oauth: None,
                change_task: None,
                dev_watcher: None,
                dev_task: None,
                generation: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Enable (if needed) and connect. Already-connected servers are left
    /// alone.
    pub async fn start(self: &Arc<Self>) -> HubResult<ServerInfo> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state == ConnectionState::Connected {
                drop(inner);
                return Ok(self.get_server_info().await);
            }
            if inner.config.disabled {
                inner.config.disabled = false;
            }
            if inner.state == ConnectionState::Disabled {
                self.set_state(&mut inner, ConnectionState::Disconnected, None);
            }
        }
        self.connect(None).await?;
        Ok(self.get_server_info().await)
    }

    /// Best-effort teardown; never fails. `disable` additionally flips the
    /// config flag and parks the supervisor in `disabled`.
    pub async fn stop(&self, disable: bool) -> ServerInfo {
        {
            let mut inner = self.inner.lock().await;
            self.teardown_locked(&mut inner).await;
            inner.dev_watcher = None;
            if let Some(task) = inner.dev_task.take() {
                task.abort();
            }
            if disable {
                inner.config.disabled = true;
                self.set_state(&mut inner, ConnectionState::Disabled, None);
            } else {
                self.set_state(&mut inner, ConnectionState::Disconnected, None);
            }
        }
        self.get_server_info().await
    }

    /// The connect algorithm. With `new_config`, the supervisor re-materializes
    /// against the replacement configuration.
    pub async fn connect(self: &Arc<Self>, new_config: Option<ServerConfig>) -> HubResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(config) = new_config {
            inner.config = config;
        }
        if inner.config.disabled {
            return Err(HubError::ConnectionFailed {
                server: self.name.clone(),
                reason: "server is disabled".into(),
            });
        }

        self.teardown_locked(&mut inner).await;
        inner.initialized = true;
        inner.error = None;
        self.set_state(&mut inner, ConnectionState::Connecting, None);

        let kind = match inner.config.kind() {
            Ok(kind) => kind,
            Err(e) => {
                let err = HubError::ConnectionFailed {
                    server: self.name.clone(),
                    reason: e.to_string(),
                };
                self.fail_locked(&mut inner, &err);
                return Err(err);
            }
        };

        let result = match kind {
            ServerKind::Stdio => self.connect_stdio(&mut inner).await,
            ServerKind::Remote => self.connect_remote(&mut inner).await,
        };

        match result {
            Ok(ConnectFlow::Connected) => {
                self.install_dev_watch(&mut inner);
                Ok(())
            }
            Ok(ConnectFlow::WaitingForAuthorization) => Ok(()),
            Err(err) => {
                self.fail_locked(&mut inner, &err);
                Err(err)
            }
        }
    }

    async fn connect_stdio(
        self: &Arc<Self>,
        inner: &mut SupervisorInner,
    ) -> HubResult<ConnectFlow> {
        let resolved = self.resolve_config(&inner.config).await?;
        let (handler, changes) = self.make_handler();
        let transport =
            ServerTransport::for_config(&self.name, &resolved, TransportFlavor::Stdio, None);

        match transport.connect(handler, self.deps.connect_timeout).await {
            ConnectOutcome::Connected(client) => {
                self.finish_connect(inner, client, changes).await?;
                Ok(ConnectFlow::Connected)
            }
            ConnectOutcome::Unauthorized => Err(HubError::ConnectionFailed {
                server: self.name.clone(),
                reason: "stdio transport unexpectedly required authorization".into(),
            }),
            ConnectOutcome::Failed(reason) => Err(HubError::ConnectionFailed {
                server: self.name.clone(),
                reason,
            }),
        }
    }

    async fn connect_remote(
        self: &Arc<Self>,
        inner: &mut SupervisorInner,
    ) -> HubResult<ConnectFlow> {
        match self
            .connect_remote_flavor(inner, TransportFlavor::StreamableHttp)
            .await?
        {
            RemoteAttempt::Connected => Ok(ConnectFlow::Connected),
            RemoteAttempt::Unauthorized(provider) => {
                self.enter_unauthorized(inner, provider).await
            }
            RemoteAttempt::Failed(http_reason) => {
                warn!(
                    server = %self.name,
                    error = %http_reason,
                    "[Supervisor] Streaming HTTP failed, falling back to SSE"
                );
                match self
                    .connect_remote_flavor(inner, TransportFlavor::Sse)
                    .await?
                {
                    RemoteAttempt::Connected => Ok(ConnectFlow::Connected),
                    RemoteAttempt::Unauthorized(provider) => {
                        self.enter_unauthorized(inner, provider).await
                    }
                    RemoteAttempt::Failed(sse_reason) => Err(HubError::ConnectionFailed {
                        server: self.name.clone(),
                        reason: format!(
                            "streamable HTTP failed ({http_reason}); SSE fallback failed ({sse_reason})"
                        ),
                    }),
                }
            }
        }
    }

    /// One remote attempt: fresh resolution, fresh OAuth provider, one
    /// token-refresh retry on 401.
    async fn connect_remote_flavor(
        self: &Arc<Self>,
        inner: &mut SupervisorInner,
        flavor: TransportFlavor,
    ) -> HubResult<RemoteAttempt> {
        let resolved = self.resolve_config(&inner.config).await?;
        let url = resolved.url.clone().unwrap_or_default();
        let provider = Arc::new(OAuthProvider::new(
            &self.name,
            &url,
            self.deps.auth_storage.clone(),
            &self.deps.callback_base_url,
        ));
        let mut bearer = provider.access_token().await;

        for retry in 0..2 {
            let (handler, changes) = self.make_handler();
            let transport =
                ServerTransport::for_config(&self.name, &resolved, flavor, bearer.clone());
            match transport.connect(handler, self.deps.connect_timeout).await {
                ConnectOutcome::Connected(client) => {
                    inner.oauth = Some(provider);
                    self.finish_connect(inner, client, changes).await?;
                    return Ok(RemoteAttempt::Connected);
                }
                ConnectOutcome::Unauthorized => {
                    if retry == 0 && provider.try_refresh().await {
                        bearer = provider.access_token().await;
                        continue;
                    }
                    return Ok(RemoteAttempt::Unauthorized(provider));
                }
                ConnectOutcome::Failed(reason) => return Ok(RemoteAttempt::Failed(reason)),
            }
        }
        Ok(RemoteAttempt::Unauthorized(provider))
    }

    /// Park in `unauthorized` with the provider's generated URL. This is a
    /// successful wait for human action, not a failure.
    async fn enter_unauthorized(
        &self,
        inner: &mut SupervisorInner,
        provider: Arc<OAuthProvider>,
    ) -> HubResult<ConnectFlow> {
        let auth_url = match provider.begin_authorization().await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(
                    server = %self.name,
                    error = %e,
                    "[Supervisor] Could not build authorization URL"
                );
                inner.error = Some(format!("authorization setup failed: {e}"));
                None
            }
        };
        inner.oauth = Some(provider);
        self.set_state(&mut *inner, ConnectionState::Unauthorized, auth_url);
        Ok(ConnectFlow::WaitingForAuthorization)
    }

    /// Store the client, fetch capabilities, register the notification
    /// pump, and go `connected`. A capability fetch failure (other than
    /// "method not found") closes the fresh client and fails the connect.
    async fn finish_connect(
        self: &Arc<Self>,
        inner: &mut SupervisorInner,
        client: McpClient,
        changes: mpsc::UnboundedReceiver<ListChange>,
    ) -> HubResult<()> {
        let mut capabilities = ServerCapabilities::default();
        for kind in CapabilityKind::ALL {
            match fetch_kind(&self.name, client.peer(), kind).await {
                Ok(records) => capabilities.set_kind(kind, records),
                Err(reason) => {
                    let _ = client.cancel().await;
                    return Err(HubError::ConnectionFailed {
                        server: self.name.clone(),
                        reason: format!("capability discovery failed: {reason}"),
                    });
                }
            }
        }
        info!(
            server = %self.name,
            tools = capabilities.tools.len(),
            resources = capabilities.resources.len(),
            templates = capabilities.resource_templates.len(),
            prompts = capabilities.prompts.len(),
            "[Supervisor] Capabilities discovered"
        );

        inner.capabilities = capabilities;
        inner.client = Some(client);
        inner.error = None;

        let generation = inner.generation;
        let weak = Arc::downgrade(self);
        let mut changes = changes;
        inner.change_task = Some(tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                let Some(supervisor) = weak.upgrade() else {
                    break;
                };
                supervisor.handle_list_change(generation, change).await;
            }
        }));

        self.set_state(&mut *inner, ConnectionState::Connected, None);
        Ok(())
    }

    /// Partial capability refresh for one reported change, then the
    /// corresponding `{kind}Changed` event.
    async fn handle_list_change(&self, generation: u64, change: ListChange) {
        {
            let inner = self.inner.lock().await;
            if inner.generation != generation || inner.state != ConnectionState::Connected {
                return;
            }
        }
        if let Err(e) = self.update_capabilities(Some(change.kinds())).await {
            warn!(
                server = %self.name,
                error = %e,
                "[Supervisor] Capability refresh after notification failed"
            );
            return;
        }
        let event = match change {
            ListChange::Tools => HubEvent::ToolsChanged {
                server: self.name.clone(),
            },
            ListChange::Resources => HubEvent::ResourcesChanged {
                server: self.name.clone(),
            },
            ListChange::Prompts => HubEvent::PromptsChanged {
                server: self.name.clone(),
            },
        };
        self.deps.events.emit(event);
    }

    /// Re-fetch some or all capability kinds. A server that does not
    /// implement a kind simply yields an empty list.
    pub async fn update_capabilities(&self, kinds: Option<&[CapabilityKind]>) -> HubResult<()> {
        let (peer, generation) = {
            let inner = self.inner.lock().await;
            if !inner.initialized {
                return Err(HubError::NotInitialized(self.name.clone()));
            }
            match (&inner.client, inner.state) {
                (Some(client), ConnectionState::Connected) => {
                    (client.peer().clone(), inner.generation)
                }
                _ => {
                    return Err(HubError::NotConnected {
                        server: self.name.clone(),
                        state: inner.state.as_str().to_string(),
                    })
                }
            }
        };

        let kinds: Vec<CapabilityKind> = kinds
            .map(<[CapabilityKind]>::to_vec)
            .unwrap_or_else(|| CapabilityKind::ALL.to_vec());

        let mut fetched = Vec::with_capacity(kinds.len());
        for kind in &kinds {
            let records = fetch_kind(&self.name, &peer, *kind).await.map_err(|reason| {
                HubError::ConnectionFailed {
                    server: self.name.clone(),
                    reason: format!("capability refresh failed: {reason}"),
                }
            })?;
            fetched.push((*kind, records));
        }

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            debug!(
                server = %self.name,
                "[Supervisor] Discarding superseded capability update"
            );
            return Ok(());
        }
        for (kind, records) in fetched {
            inner.capabilities.set_kind(kind, records);
        }
        Ok(())
    }

    /// Invoke a tool by name.
    pub async fn call_tool(&self, tool: &str, args: Option<Value>) -> HubResult<Value> {
        let peer = {
            let inner = self.inner.lock().await;
            self.guard_dispatch(&inner)?;
            if !inner.capabilities.has_tool(tool) {
                return Err(HubError::ToolNotFound {
                    server: self.name.clone(),
                    tool: tool.to_string(),
                    available: inner.capabilities.tool_names(),
                });
            }
            self.peer_locked(&inner)?
        };
        let arguments = normalize_arguments(&self.name, "tools/call", args)?;

        let result = peer
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| HubError::ToolExecutionFailed {
                server: self.name.clone(),
                tool: tool.to_string(),
                reason: e.to_string(),
            })?;

        serde_json::to_value(result).map_err(|e| HubError::ToolExecutionFailed {
            server: self.name.clone(),
            tool: tool.to_string(),
            reason: format!("cannot serialize result: {e}"),
        })
    }

    /// Read a resource by URI; templates validate URIs the client built.
    pub async fn read_resource(&self, uri: &str) -> HubResult<Value> {
        let peer = {
            let inner = self.inner.lock().await;
            self.guard_dispatch(&inner)?;
            if !inner.capabilities.matches_resource(uri) {
                let mut available = inner.capabilities.resource_uris();
                available.extend(inner.capabilities.template_uris());
                return Err(HubError::ResourceNotFound {
                    server: self.name.clone(),
                    uri: uri.to_string(),
                    available,
                });
            }
            self.peer_locked(&inner)?
        };

        let result = peer
            .read_resource(ReadResourceRequestParam { uri: uri.into() })
            .await
            .map_err(|e| HubError::ResourceReadFailed {
                server: self.name.clone(),
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;

        serde_json::to_value(result).map_err(|e| HubError::ResourceReadFailed {
            server: self.name.clone(),
            uri: uri.to_string(),
            reason: format!("cannot serialize result: {e}"),
        })
    }

    /// Render a prompt by name.
    pub async fn get_prompt(&self, prompt: &str, args: Option<Value>) -> HubResult<Value> {
        let peer = {
            let inner = self.inner.lock().await;
            self.guard_dispatch(&inner)?;
            if !inner.capabilities.has_prompt(prompt) {
                return Err(HubError::PromptNotFound {
                    server: self.name.clone(),
                    prompt: prompt.to_string(),
                    available: inner.capabilities.prompt_names(),
                });
            }
            self.peer_locked(&inner)?
        };
        let arguments = normalize_arguments(&self.name, "prompts/get", args)?;

        let result = peer
            .get_prompt(GetPromptRequestParam {
                name: prompt.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| HubError::PromptExecutionFailed {
                server: self.name.clone(),
                prompt: prompt.to_string(),
                reason: e.to_string(),
            })?;

        serde_json::to_value(result).map_err(|e| HubError::PromptExecutionFailed {
            server: self.name.clone(),
            prompt: prompt.to_string(),
            reason: format!("cannot serialize result: {e}"),
        })
    }

    /// The authorization URL for an `unauthorized` server.
    pub async fn authorize(&self) -> HubResult<String> {
        let inner = self.inner.lock().await;
        inner
            .oauth
            .as_ref()
            .and_then(|provider| provider.authorization_url())
            .ok_or_else(|| HubError::Unauthorized {
                server: self.name.clone(),
                authorization_url: None,
            })
    }

    /// Complete the OAuth callback and drive the connection to `connected`.
    pub async fn handle_auth_callback(self: &Arc<Self>, code: &str) -> HubResult<()> {
        let provider = {
            let inner = self.inner.lock().await;
            inner.oauth.clone()
        }
        .ok_or_else(|| HubError::ConnectionFailed {
            server: self.name.clone(),
            reason: "no authorization in progress".into(),
        })?;

        provider
            .complete_authorization(code)
            .await
            .map_err(|e| HubError::ConnectionFailed {
                server: self.name.clone(),
                reason: format!("authorization callback failed: {e}"),
            })?;

        self.connect(None).await
    }

    /// Current snapshot.
    pub async fn get_server_info(&self) -> ServerInfo {
        let display_name = self.deps.marketplace.display_name(&self.name).await;
        let inner = self.inner.lock().await;
        let authorization_url = if inner.state == ConnectionState::Unauthorized {
            inner
                .oauth
                .as_ref()
                .and_then(|provider| provider.authorization_url())
        } else {
            None
        };
        ServerInfo {
            name: self.name.clone(),
            display_name,
            kind: inner.config.kind().ok(),
            state: inner.state,
            disabled: inner.config.disabled,
            error: inner.error.clone(),
            uptime_seconds: inner.started_at.map(|t| t.elapsed().as_secs()),
            authorization_url,
            capabilities: inner.capabilities.clone(),
            description: inner.config.description.clone(),
        }
    }

    /// The configuration the supervisor currently runs with.
    pub async fn config(&self) -> ServerConfig {
        self.inner.lock().await.config.clone()
    }

    /// Swap the configuration without touching the connection. Used by the
    /// hub when a modified server ends up disabled, where a reconnect will
    /// never happen.
    pub async fn replace_config(&self, config: ServerConfig) {
        self.inner.lock().await.config = config;
    }

    // ── internals ──

    fn make_handler(&self) -> (HubClientHandler, mpsc::UnboundedReceiver<ListChange>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            HubClientHandler::new(&self.name, tx, self.deps.events.clone()),
            rx,
        )
    }

    async fn resolve_config(&self, config: &ServerConfig) -> HubResult<ServerConfig> {
        let resolver =
            PlaceholderResolver::new(ResolverOptions::strict(), self.deps.executor.clone());
        resolver.resolve(config).await
    }

    /// Close the protocol client and neutralize notification handling.
    /// Idempotent and best-effort; a remote session is terminated through
    /// the client's own cancellation path and the result ignored.
    async fn teardown_locked(&self, inner: &mut SupervisorInner) {
        inner.generation += 1;
        if let Some(task) = inner.change_task.take() {
            task.abort();
        }
        if let Some(client) = inner.client.take() {
            let _ = client.cancel().await;
        }
        inner.capabilities = ServerCapabilities::default();
        inner.oauth = None;
    }

    fn fail_locked(&self, inner: &mut SupervisorInner, err: &HubError) {
        let message = err.to_string();
        inner.error = Some(message.clone());
        self.set_state(inner, ConnectionState::Disconnected, Some(message));
    }

    fn set_state(
        &self,
        inner: &mut SupervisorInner,
        state: ConnectionState,
        message: Option<String>,
    ) {
        inner.state = state;
        inner.started_at = match state {
            ConnectionState::Connected | ConnectionState::Disabled => Some(Instant::now()),
            _ => None,
        };
        info!(server = %self.name, state = state.as_str(), "[Supervisor] State changed");
        self.deps.events.emit(HubEvent::ServerStateChanged {
            server: self.name.clone(),
            state,
            message,
        });
    }

    fn guard_dispatch(&self, inner: &SupervisorInner) -> HubResult<()> {
        if !inner.initialized {
            return Err(HubError::NotInitialized(self.name.clone()));
        }
        if inner.state != ConnectionState::Connected {
            return Err(HubError::NotConnected {
                server: self.name.clone(),
                state: inner.state.as_str().to_string(),
            });
        }
        Ok(())
    }

    fn peer_locked(&self, inner: &SupervisorInner) -> HubResult<Peer<RoleClient>> {
        match &inner.client {
            Some(client) => Ok(client.peer().clone()),
            None => Err(HubError::NotConnected {
                server: self.name.clone(),
                state: inner.state.as_str().to_string(),
            }),
        }
    }

    /// Dev mode: watch the configured globs and reconnect on change. The
    /// watcher survives reconnects and is torn down by `stop()`.
    fn install_dev_watch(self: &Arc<Self>, inner: &mut SupervisorInner) {
        let Some(dev) = inner.config.dev.clone() else {
            return;
        };
        if !dev.enabled || inner.dev_watcher.is_some() {
            return;
        }
        if inner.config.kind().ok() != Some(ServerKind::Stdio) {
            return;
        }

        let (tx, mut rx) = mpsc::channel(4);
        match DevWatcher::spawn(&self.name, &dev, tx) {
            Ok(watcher) => {
                inner.dev_watcher = Some(watcher);
                let weak = Arc::downgrade(self);
                inner.dev_task = Some(tokio::spawn(async move {
                    while rx.recv().await.is_some() {
                        let Some(supervisor) = weak.upgrade() else {
                            break;
                        };
                        info!(
                            server = %supervisor.name,
                            "[Supervisor] Dev watch triggered, restarting server"
                        );
                        if let Err(e) = supervisor.connect(None).await {
                            warn!(
                                server = %supervisor.name,
                                error = %e,
                                "[Supervisor] Dev restart failed"
                            );
                        }
                    }
                }));
            }
            Err(e) => {
                warn!(server = %self.name, error = %e, "[Supervisor] Dev watch unavailable");
            }
        }
    }
}

/// Fetch one capability kind. "Method not found" means the server does not
/// implement the kind and yields an empty list; every other failure is
/// returned to the caller, which fails the connect or refresh.
async fn fetch_kind(
    server: &str,
    peer: &Peer<RoleClient>,
    kind: CapabilityKind,
) -> Result<Vec<Value>, String> {
    fn to_values<T: Serialize>(items: Vec<T>) -> Vec<Value> {
        items
            .into_iter()
            .map(|item| serde_json::to_value(item).unwrap_or(Value::Null))
            .collect()
    }

    let result = match kind {
        CapabilityKind::Tools => peer.list_all_tools().await.map(to_values),
        CapabilityKind::Resources => peer.list_all_resources().await.map(to_values),
        CapabilityKind::ResourceTemplates => {
            peer.list_all_resource_templates().await.map(to_values)
        }
        CapabilityKind::Prompts => peer.list_all_prompts().await.map(to_values),
    };

    match result {
        Ok(records) => Ok(records),
        Err(e) => {
            let message = e.to_string();
            if is_method_not_found(&message) {
                debug!(
                    server = %server,
                    kind = kind.as_str(),
                    "[Supervisor] Capability kind not implemented"
                );
                Ok(Vec::new())
            } else {
                Err(format!("{} fetch failed: {message}", kind.as_str()))
            }
        }
    }
}

fn is_method_not_found(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("method not found") || lower.contains("-32601")
}

/// Dispatch arguments must be null, a mapping, or an ordered sequence. A
/// sequence is keyed by position for the wire, which only speaks mappings.
fn normalize_arguments(
    server: &str,
    operation: &str,
    args: Option<Value>,
) -> HubResult<Option<Map<String, Value>>> {
    match args {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Array(items)) => Ok(Some(
            items
                .into_iter()
                .enumerate()
                .map(|(index, value)| (index.to_string(), value))
                .collect(),
        )),
        Some(_) => Err(HubError::InvalidArguments {
            server: server.to_string(),
            operation: operation.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_arguments() {
        assert!(normalize_arguments("s", "tools/call", None).unwrap().is_none());
        assert!(normalize_arguments("s", "tools/call", Some(Value::Null))
            .unwrap()
            .is_none());

        let map = normalize_arguments("s", "tools/call", Some(json!({ "a": 1 })))
            .unwrap()
            .unwrap();
        assert_eq!(map["a"], json!(1));

        let seq = normalize_arguments("s", "tools/call", Some(json!(["x", "y"])))
            .unwrap()
            .unwrap();
        assert_eq!(seq["0"], json!("x"));
        assert_eq!(seq["1"], json!("y"));

        let err = normalize_arguments("s", "tools/call", Some(json!("scalar"))).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENTS");
    }

    #[test]
    fn test_is_method_not_found() {
        assert!(is_method_not_found("Method not found"));
        assert!(is_method_not_found("mcp error: -32601 (method not found)"));
        assert!(!is_method_not_found("internal error"));
    }
}
