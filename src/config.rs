// SPDX-License-Identifier: Apache-2.0

//! Federation configuration
//!
//! Loaded from `DORM_*` environment variables or a JSON file. Every field has
//! a default, so an empty file or environment yields a usable config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{BackendKind, ConnectionConfig};
use crate::federation::locator::Endpoint;
use crate::federation::types::{Placement, ReplicaWritePolicy};
use crate::observability::Sensitive;

/// Default bound on a single driver call (30 seconds).
pub const DEFAULT_DRIVER_TIMEOUT_MS: u64 = 30_000;

/// Default bound on one node's schema discovery (60 seconds).
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 60_000;

pub const DEFAULT_DATABASE: &str = "dorm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub driver_ms: u64,
    pub discovery_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            driver_ms: DEFAULT_DRIVER_TIMEOUT_MS,
            discovery_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
        }
    }
}

impl Timeouts {
    pub fn driver(&self) -> Duration {
        Duration::from_millis(self.driver_ms)
    }

    pub fn discovery(&self) -> Duration {
        Duration::from_millis(self.discovery_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FederationConfig {
    pub timeouts: Timeouts,
    pub username: String,
    pub password: Sensitive<String>,
    pub database: String,
    /// Backend assumed for endpoints that do not name one
    pub backend: BackendKind,
    pub port: Option<u16>,
    pub pool_max_connections: Option<u32>,
    pub default_placement: Placement,
    pub replica_writes: ReplicaWritePolicy,
    /// Endpoint URLs for the static locator
    pub endpoints: Vec<String>,
}

impl Default for FederationConfig {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            username: String::new(),
            password: Sensitive::default(),
            database: DEFAULT_DATABASE.to_string(),
            backend: BackendKind::Postgres,
            port: None,
            pool_max_connections: None,
            default_placement: Placement::Primaries,
            replica_writes: ReplicaWritePolicy::Reject,
            endpoints: Vec::new(),
        }
    }
}

impl FederationConfig {
    /// Reads `DORM_*` variables on top of the defaults.
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Self::from_env`], with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("DORM_USERNAME") {
            config.username = v;
        }
        if let Some(v) = var("DORM_PASSWORD") {
            config.password = Sensitive::new(v);
        }
        if let Some(v) = var("DORM_DATABASE") {
            config.database = v;
        }
        if let Some(v) = var("DORM_BACKEND") {
            config.backend = BackendKind::from(v);
        }
        if let Some(v) = var("DORM_PORT") {
            config.port = Some(parse_number("DORM_PORT", &v)?);
        }
        if let Some(v) = var("DORM_POOL_MAX_CONNECTIONS") {
            config.pool_max_connections = Some(parse_number("DORM_POOL_MAX_CONNECTIONS", &v)?);
        }
        if let Some(v) = var("DORM_DRIVER_TIMEOUT_MS") {
            config.timeouts.driver_ms = parse_number("DORM_DRIVER_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("DORM_DISCOVERY_TIMEOUT_MS") {
            config.timeouts.discovery_ms = parse_number("DORM_DISCOVERY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("DORM_PLACEMENT") {
            config.default_placement = match v.trim().to_ascii_lowercase().as_str() {
                "primaries" => Placement::Primaries,
                "all" => Placement::All,
                other => {
                    return Err(EngineError::validation(format!(
                        "DORM_PLACEMENT must be 'primaries' or 'all', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(v) = var("DORM_REPLICA_WRITES") {
            config.replica_writes = ReplicaWritePolicy::parse(&v).ok_or_else(|| {
                EngineError::validation(format!(
                    "DORM_REPLICA_WRITES must be 'reject' or 'allow', got '{}'",
                    v
                ))
            })?;
        }
        if let Some(v) = var("DORM_ENDPOINTS") {
            config.endpoints = split_endpoints(&v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON config file; missing fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::validation(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            EngineError::validation(format!("Invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.timeouts.driver_ms == 0 {
            return Err(EngineError::validation("driver timeout must be positive"));
        }
        if self.timeouts.discovery_ms == 0 {
            return Err(EngineError::validation("discovery timeout must be positive"));
        }
        if let Placement::Nodes(ids) = &self.default_placement {
            if ids.is_empty() {
                return Err(EngineError::validation("default placement lists no nodes"));
            }
        }
        Ok(())
    }

    /// Connection parameters for `endpoint`, endpoint values winning over
    /// configured defaults.
    pub fn connection_for(&self, endpoint: &Endpoint) -> ConnectionConfig {
        let driver = endpoint
            .backend
            .clone()
            .unwrap_or_else(|| self.backend.clone());
        let port = endpoint
            .port
            .or(self.port)
            .unwrap_or_else(|| driver.default_port());

        ConnectionConfig {
            port,
            host: endpoint.address.clone(),
            username: endpoint
                .username
                .clone()
                .unwrap_or_else(|| self.username.clone()),
            password: endpoint
                .password
                .clone()
                .unwrap_or_else(|| self.password.clone()),
            database: Some(
                endpoint
                    .database
                    .clone()
                    .unwrap_or_else(|| self.database.clone()),
            ),
            pool_max_connections: self.pool_max_connections,
            pool_acquire_timeout_secs: Some(self.timeouts.driver_ms.div_ceil(1000).max(1) as u32),
            driver,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> EngineResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::validation(format!("{} must be a number, got '{}'", key, value)))
}

/// Endpoints are separated by commas or whitespace.
fn split_endpoints(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = FederationConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.timeouts.driver_ms, DEFAULT_DRIVER_TIMEOUT_MS);
        assert_eq!(config.database, "dorm");
        assert_eq!(config.default_placement, Placement::Primaries);
        assert_eq!(config.replica_writes, ReplicaWritePolicy::Reject);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let config = FederationConfig::from_lookup(lookup(&[
            ("DORM_USERNAME", "docker"),
            ("DORM_PASSWORD", "docker"),
            ("DORM_DRIVER_TIMEOUT_MS", "250"),
            ("DORM_PLACEMENT", "all"),
            ("DORM_REPLICA_WRITES", "allow"),
            ("DORM_ENDPOINTS", "postgres://a/dorm, postgres://b/dorm"),
        ]))
        .unwrap();

        assert_eq!(config.username, "docker");
        assert_eq!(config.password.expose(), "docker");
        assert_eq!(config.timeouts.driver(), Duration::from_millis(250));
        assert_eq!(config.default_placement, Placement::All);
        assert_eq!(config.replica_writes, ReplicaWritePolicy::Allow);
        assert_eq!(config.endpoints, vec!["postgres://a/dorm", "postgres://b/dorm"]);
    }

    #[test]
    fn test_invalid_env_values() {
        assert!(FederationConfig::from_lookup(lookup(&[("DORM_PORT", "abc")])).is_err());
        assert!(FederationConfig::from_lookup(lookup(&[("DORM_DRIVER_TIMEOUT_MS", "0")])).is_err());
        assert!(FederationConfig::from_lookup(lookup(&[("DORM_PLACEMENT", "some")])).is_err());
    }

    #[test]
    fn test_from_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dorm.json");
        std::fs::write(
            &path,
            r#"{"username": "docker", "timeouts": {"driver_ms": 500}, "replica_writes": "allow"}"#,
        )
        .unwrap();

        let config = FederationConfig::from_file(&path).unwrap();
        assert_eq!(config.username, "docker");
        assert_eq!(config.timeouts.driver_ms, 500);
        assert_eq!(config.timeouts.discovery_ms, DEFAULT_DISCOVERY_TIMEOUT_MS);
        assert_eq!(config.replica_writes, ReplicaWritePolicy::Allow);
        assert_eq!(config.database, "dorm");
    }

    #[test]
    fn test_connection_for_endpoint() {
        let config = FederationConfig {
            username: "docker".to_string(),
            ..FederationConfig::default()
        };

        let pg = config.connection_for(&Endpoint::new("h", "10.0.0.5"));
        assert_eq!(pg.driver, BackendKind::Postgres);
        assert_eq!(pg.port, 5432);
        assert_eq!(pg.username, "docker");
        assert_eq!(pg.database.as_deref(), Some("dorm"));

        let lite = config.connection_for(
            &Endpoint::new("h2", "/tmp/a.db")
                .backend("sqlite")
                .database("/tmp/a.db"),
        );
        assert_eq!(lite.driver, BackendKind::Sqlite);
        assert_eq!(lite.port, 0);
        assert_eq!(lite.database.as_deref(), Some("/tmp/a.db"));
    }
}
