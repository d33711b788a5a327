//! Core entities: server configuration, config diffs, capability lists, and
//! the event model.

pub mod capability;
pub mod config;
pub mod diff;
pub mod event;

pub use capability::{template_matches, CapabilityKind, ServerCapabilities};
pub use config::{DevConfig, HubConfig, ServerConfig, ServerKind};
pub use diff::{ConfigDiff, DiffDetail, SIGNIFICANT_FIELDS};
pub use event::{
    ConnectionState, EventTopic, HubEvent, HubState, LogLevel, SubscriptionEventKind,
};
