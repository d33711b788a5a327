//! Marketplace collaborator.
//!
//! The catalog fetcher lives outside the hub; all the hub needs from it is
//! a display name for a configured server, when the catalog knows one.

use std::collections::HashMap;

use async_trait::async_trait;

/// The thin contract the hub consumes.
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Human-readable title for a server name, if the catalog has one.
    async fn display_name(&self, server: &str) -> Option<String>;
}

/// Default collaborator: knows nothing.
pub struct NullMarketplace;

#[async_trait]
impl Marketplace for NullMarketplace {
    async fn display_name(&self, _server: &str) -> Option<String> {
        None
    }
}

/// Fixed mapping, for embedders with a pre-fetched catalog and for tests.
#[derive(Default)]
pub struct StaticMarketplace {
    names: HashMap<String, String>,
}

impl StaticMarketplace {
    pub fn new(names: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Marketplace for StaticMarketplace {
    async fn display_name(&self, server: &str) -> Option<String> {
        self.names.get(server).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_marketplace() {
        assert!(NullMarketplace.display_name("anything").await.is_none());
    }

    #[tokio::test]
    async fn test_static_marketplace() {
        let marketplace = StaticMarketplace::new([(
            "local-search".to_string(),
            "Local Search".to_string(),
        )]);
        assert_eq!(
            marketplace.display_name("local-search").await.as_deref(),
            Some("Local Search")
        );
        assert!(marketplace.display_name("other").await.is_none());
    }
}
