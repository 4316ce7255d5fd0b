use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::memory::MEMORY_SCHEME;
use super::{FileSystem, LOCAL_SCHEME, LocalFs, MemoryFs, RootUri};
use crate::error::ConfigError;

/// Builds the adapter for one root from the `policy.fs.*` options.
pub type AdapterConnector =
    fn(&RootUri, &BTreeMap<String, String>) -> Result<Arc<dyn FileSystem>, ConfigError>;

/// Maps uri schemes to adapter connectors.
#[derive(Clone)]
pub struct AdapterRegistry {
    connectors: BTreeMap<String, AdapterConnector>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(LOCAL_SCHEME, LocalFs::connect);
        registry.register(MEMORY_SCHEME, MemoryFs::connect);
        registry
    }
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("schemes", &self.connectors.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self {
            connectors: BTreeMap::new(),
        }
    }

    /// Register (or replace) the connector for `scheme`.
    pub fn register(&mut self, scheme: impl Into<String>, connector: AdapterConnector) {
        self.connectors
            .insert(scheme.into().to_ascii_lowercase(), connector);
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.connectors.contains_key(&scheme.to_ascii_lowercase())
    }

    pub fn connect(
        &self,
        uri: &RootUri,
        options: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn FileSystem>, ConfigError> {
        let connector =
            self.connectors
                .get(uri.scheme())
                .ok_or_else(|| ConfigError::UnsupportedScheme {
                    scheme: uri.scheme().to_string(),
                    uri: uri.to_string(),
                })?;
        connector(uri, options)
    }
}
