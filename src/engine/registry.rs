// SPDX-License-Identifier: Apache-2.0

//! Driver Registry
//!
//! Maps a backend kind to the factory that binds drivers for it, so nodes
//! of any registered backend can be constructed from a locator endpoint.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::drivers::postgres::PostgresFactory;
use crate::engine::drivers::sqlite::SqliteFactory;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::traits::Driver;
use crate::engine::types::{BackendKind, ConnectionConfig};

/// Builds drivers for one backend kind
pub trait DriverFactory: Send + Sync {
    /// Backend kind this factory serves (e.g., "postgres", "sqlite")
    fn driver_id(&self) -> &'static str;

    /// Binds a driver to the database `config` describes.
    ///
    /// Must not require the backend to be reachable yet.
    fn build(&self, config: &ConnectionConfig) -> EngineResult<Arc<dyn Driver>>;
}

/// Registry that holds all available driver factories
pub struct DriverRegistry {
    factories: HashMap<String, Arc<dyn DriverFactory>>,
}

impl DriverRegistry {
    /// Creates a new empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in PostgreSQL and SQLite factories
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PostgresFactory));
        registry.register(Arc::new(SqliteFactory));
        registry
    }

    /// Registers a factory under its `driver_id()`, replacing any previous one
    pub fn register(&mut self, factory: Arc<dyn DriverFactory>) {
        let id = factory.driver_id().to_string();
        self.factories.insert(id, factory);
    }

    pub fn get(&self, backend: &BackendKind) -> Option<Arc<dyn DriverFactory>> {
        self.factories.get(backend.as_str()).cloned()
    }

    /// Builds a driver for `config.driver`
    pub fn build(&self, config: &ConnectionConfig) -> EngineResult<Arc<dyn Driver>> {
        let factory = self
            .get(&config.driver)
            .ok_or_else(|| EngineError::driver_not_found(config.driver.as_str()))?;
        factory.build(config)
    }

    /// Lists all registered backend kinds, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.factories.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
