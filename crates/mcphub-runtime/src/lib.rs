//! # MCP Hub Runtime
//!
//! The I/O half of the hub:
//!
//! - `transport` - stdio, streaming HTTP, and SSE transport construction
//! - `oauth` - PKCE authorization-code flow, registration, token storage
//! - `supervisor` - per-server connection lifecycle and dispatch
//! - `hub` - the hub core owning all supervisors
//! - `subscriptions` - subscriber fan-out, client accounting, auto-shutdown
//! - `marketplace` - the display-name collaborator contract

pub mod hub;
pub mod marketplace;
pub mod oauth;
pub mod subscriptions;
pub mod supervisor;
pub mod transport;

pub use hub::{HubOptions, McpHub};
pub use marketplace::{Marketplace, NullMarketplace, StaticMarketplace};
pub use oauth::{AuthStorage, OAuthProvider};
pub use subscriptions::{
    AutoShutdown, ShutdownReason, SubscriberSink, SubscriptionFilter, SubscriptionLayer,
};
pub use supervisor::{ServerInfo, ServerSupervisor, SupervisorDeps, DEFAULT_CONNECT_TIMEOUT};
pub use transport::{ConnectOutcome, ServerTransport, TransportFlavor};
