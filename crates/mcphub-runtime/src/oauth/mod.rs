//! OAuth 2.1 authorization-code flow with PKCE for remote servers.
//!
//! - `discovery` - authorization-server metadata (OIDC, then RFC 8414)
//! - `dcr` - dynamic client registration (RFC 7591)
//! - `token` - token shapes and expiry
//! - `store` - per-server on-disk persistence
//! - `provider` - the per-connection orchestrator the supervisor drives,
//!   including PKCE (RFC 7636) and CSRF-state generation

pub mod dcr;
pub mod discovery;
pub mod provider;
pub mod store;
pub mod token;

pub use discovery::{issuer_from_server_url, OAuthDiscovery, OAuthMetadata};
pub use provider::OAuthProvider;
pub use store::{AuthStorage, StoredClient};
pub use token::{OAuthToken, TokenResponse};
