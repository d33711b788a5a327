//! Protocol client handler for one supervised server.
//!
//! Implements the client side of the MCP protocol: identifies the hub to
//! the server and turns incoming notifications into supervisor work. List
//! changes are forwarded on a channel (the supervisor owns the task that
//! refreshes the affected capability kind); server log notifications are
//! mirrored into hub logs and onto the event bus.

use rmcp::model::{
    ClientCapabilities, ClientInfo, Implementation, LoggingLevel,
    LoggingMessageNotificationParam,
};
use rmcp::service::{NotificationContext, RunningService};
use rmcp::{ClientHandler, RoleClient};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use mcphub_core::{CapabilityKind, EventSender, HubEvent, LogLevel};

/// The protocol client driving one connection.
pub type McpClient = RunningService<RoleClient, HubClientHandler>;

/// A capability-list change reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListChange {
    Tools,
    /// Covers both concrete resources and resource templates.
    Resources,
    Prompts,
}

impl ListChange {
    /// The capability kinds to re-fetch for this change.
    pub fn kinds(&self) -> &'static [CapabilityKind] {
        match self {
            Self::Tools => &[CapabilityKind::Tools],
            Self::Resources => &[CapabilityKind::Resources, CapabilityKind::ResourceTemplates],
            Self::Prompts => &[CapabilityKind::Prompts],
        }
    }
}

#[derive(Clone)]
pub struct HubClientHandler {
    info: ClientInfo,
    server: String,
    changes: mpsc::UnboundedSender<ListChange>,
    events: EventSender,
}

impl std::fmt::Debug for HubClientHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubClientHandler")
            .field("server", &self.server)
            .finish()
    }
}

impl HubClientHandler {
    pub fn new(
        server: &str,
        changes: mpsc::UnboundedSender<ListChange>,
        events: EventSender,
    ) -> Self {
        Self {
            info: ClientInfo {
                protocol_version: Default::default(),
                capabilities: ClientCapabilities::default(),
                client_info: Implementation {
                    name: format!("mcp-hub-{server}"),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    title: Some("MCP Hub".to_string()),
                    ..Default::default()
                },
            },
            server: server.to_string(),
            changes,
            events,
        }
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    fn forward(&self, change: ListChange) {
        info!(
            server = %self.server,
            change = ?change,
            "[Supervisor] Server reported list change"
        );
        if self.changes.send(change).is_err() {
            // Neutralized after disconnect; stale notifications are dropped.
            debug!(server = %self.server, "[Supervisor] Change channel closed, ignoring");
        }
    }

    fn log_level(level: &LoggingLevel) -> LogLevel {
        match level {
            LoggingLevel::Debug => LogLevel::Debug,
            LoggingLevel::Info | LoggingLevel::Notice => LogLevel::Info,
            LoggingLevel::Warning => LogLevel::Warn,
            LoggingLevel::Error
            | LoggingLevel::Critical
            | LoggingLevel::Alert
            | LoggingLevel::Emergency => LogLevel::Error,
        }
    }
}

impl ClientHandler for HubClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }

    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let this = self.clone();
        async move { this.forward(ListChange::Tools) }
    }

    fn on_resource_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let this = self.clone();
        async move { this.forward(ListChange::Resources) }
    }

    fn on_prompt_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let this = self.clone();
        async move { this.forward(ListChange::Prompts) }
    }

    fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let server = self.server.clone();
        let events = self.events.clone();
        async move {
            let message = match &params.data {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let level = Self::log_level(&params.level);

            match level {
                LogLevel::Error => warn!(server = %server, "[Server log] {message}"),
                _ => debug!(server = %server, "[Server log] {message}"),
            }
            events.emit(HubEvent::Log {
                level,
                message: format!("[{server}] {message}"),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcphub_core::EventBus;

    #[test]
    fn test_handler_identity() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handler = HubClientHandler::new("notes", tx, bus.sender());
        let info = handler.get_info();
        assert_eq!(info.client_info.name, "mcp-hub-notes");
        assert_eq!(info.client_info.title.as_deref(), Some("MCP Hub"));
    }

    #[test]
    fn test_list_change_kinds() {
        assert_eq!(ListChange::Tools.kinds(), &[CapabilityKind::Tools]);
        assert_eq!(
            ListChange::Resources.kinds(),
            &[CapabilityKind::Resources, CapabilityKind::ResourceTemplates]
        );
        assert_eq!(ListChange::Prompts.kinds(), &[CapabilityKind::Prompts]);
    }

    #[tokio::test]
    async fn test_forward_after_receiver_drop_is_silent() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = HubClientHandler::new("notes", tx, bus.sender());
        drop(rx);
        // Does not panic; the stale notification is dropped.
        handler.forward(ListChange::Tools);
    }
}
