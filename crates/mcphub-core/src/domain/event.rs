//! Hub events and the state enums they carry.
//!
//! Every observable state change flows through [`HubEvent`]; producers emit
//! onto the event bus and consumers (the subscription layer, loggers) decide
//! which events they care about. Events serialize with a snake_case `type`
//! tag so the wire shape is stable:
//!
//! ```json
//! { "type": "server_state_changed", "server": "notes", "state": "connected" }
//! ```

use serde::{Deserialize, Serialize};

use super::diff::ConfigDiff;

/// Process-wide phase label of the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubState {
    Starting,
    Ready,
    Restarting,
    Restarted,
    Stopping,
    Stopped,
    Error,
}

impl HubState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Restarting => "restarting",
            Self::Restarted => "restarted",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
        }
    }
}

/// Per-server connection state, driven by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// The configuration disables this server; no transport exists.
    Disabled,
    /// No transport; the last failure (if any) is retained as an error string.
    #[default]
    Disconnected,
    /// Transport is being created or capabilities are being fetched.
    Connecting,
    /// A remote transport replied 401; an authorization URL is waiting for
    /// the user.
    Unauthorized,
    /// Transport open, capabilities loaded.
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Unauthorized => "unauthorized",
            Self::Connected => "connected",
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// States in which the supervisor is waiting rather than transitioning.
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Connecting)
    }
}

/// Log severities mirrored onto the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Subtypes a subscriber can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionEventKind {
    ConfigChanged,
    ServersUpdating,
    ServersUpdated,
    ToolListChanged,
    ResourceListChanged,
    PromptListChanged,
}

/// Enumerated topics; there are no ad-hoc string topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventTopic {
    HubState,
    SubscriptionEvent,
    Log,
}

/// All events the hub emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// The hub state label changed.
    HubStateChanged { state: HubState },

    /// The config source changed on disk (significant or not).
    ConfigChangeDetected { significant: bool },

    /// A significant config change is about to be applied.
    ImportantConfigChanged { diff: ConfigDiff },

    /// All start/stop/reconnect operations for a significant change settled.
    ImportantConfigChangeHandled { diff: ConfigDiff },

    /// A supervisor transitioned.
    ServerStateChanged {
        server: String,
        state: ConnectionState,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A server's tool list changed.
    ToolsChanged { server: String },

    /// A server's resource (or resource template) list changed.
    ResourcesChanged { server: String },

    /// A server's prompt list changed.
    PromptsChanged { server: String },

    /// A structured log record for subscribed clients.
    Log { level: LogLevel, message: String },
}

impl HubEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::HubStateChanged { .. } => "hub_state_changed",
            Self::ConfigChangeDetected { .. } => "config_change_detected",
            Self::ImportantConfigChanged { .. } => "important_config_changed",
            Self::ImportantConfigChangeHandled { .. } => "important_config_change_handled",
            Self::ServerStateChanged { .. } => "server_state_changed",
            Self::ToolsChanged { .. } => "tools_changed",
            Self::ResourcesChanged { .. } => "resources_changed",
            Self::PromptsChanged { .. } => "prompts_changed",
            Self::Log { .. } => "log",
        }
    }

    /// The topic this event is published under.
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::HubStateChanged { .. } => EventTopic::HubState,
            Self::Log { .. } => EventTopic::Log,
            _ => EventTopic::SubscriptionEvent,
        }
    }

    /// The filterable subtype, for `SUBSCRIPTION_EVENT` topic events.
    pub fn subscription_kind(&self) -> Option<SubscriptionEventKind> {
        match self {
            Self::ConfigChangeDetected { .. } => Some(SubscriptionEventKind::ConfigChanged),
            Self::ImportantConfigChanged { .. } => Some(SubscriptionEventKind::ServersUpdating),
            Self::ImportantConfigChangeHandled { .. } | Self::ServerStateChanged { .. } => {
                Some(SubscriptionEventKind::ServersUpdated)
            }
            Self::ToolsChanged { .. } => Some(SubscriptionEventKind::ToolListChanged),
            Self::ResourcesChanged { .. } => Some(SubscriptionEventKind::ResourceListChanged),
            Self::PromptsChanged { .. } => Some(SubscriptionEventKind::PromptListChanged),
            Self::HubStateChanged { .. } | Self::Log { .. } => None,
        }
    }

    /// The server this event is scoped to, if any.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::ServerStateChanged { server, .. }
            | Self::ToolsChanged { server }
            | Self::ResourcesChanged { server }
            | Self::PromptsChanged { server } => Some(server),
            _ => None,
        }
    }
}
