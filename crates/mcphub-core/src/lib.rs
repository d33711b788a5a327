//! # MCP Hub Core
//!
//! Domain model and pure machinery for the hub:
//!
//! - `domain` - server configuration, config diffs, capability lists, events
//! - `config` - the configuration store (load/validate/diff) and its file
//!   watcher
//! - `resolver` - the placeholder resolution engine (`${VAR}`, `${cmd: …}`)
//! - `event_bus` - the in-process fan-out bus
//! - `error` - the error taxonomy crossing the hub boundary

pub mod config;
pub mod domain;
pub mod error;
pub mod event_bus;
pub mod resolver;

pub use config::{watcher::ConfigWatcher, ConfigSource, ConfigStore, LoadOutcome};
pub use domain::*;
pub use error::{HubError, HubResult};
pub use event_bus::{EventBus, EventReceiver, EventSender, SharedEventBus};
pub use resolver::{
    CommandError, CommandExecutor, PlaceholderResolver, ResolverOptions, ShellExecutor,
    DEFAULT_COMMAND_TIMEOUT,
};
