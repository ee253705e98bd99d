// SPDX-License-Identifier: Apache-2.0

//! In-memory driver and locator shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use dorm::config::Timeouts;
use dorm::engine::{
    ColumnInfo, ColumnShape, ConnectionConfig, Driver, DriverFactory, EngineError, EngineResult,
    NodeId, QueryResult, Row, SqlDialect, TableShape, Value,
};
use dorm::federation::{Endpoint, Node, NodeLocator};

pub const MOCK_BACKEND: &str = "mock";

type Rows = Vec<BTreeMap<String, Value>>;

#[derive(Default)]
struct MockState {
    tables: Vec<TableShape>,
    rows: HashMap<String, Rows>,
    executed: Vec<String>,
    commits: usize,
    rollbacks: usize,
    closed: bool,
    unreachable: bool,
    fail_rollback: bool,
    affected_override: Option<u64>,
    delay: Option<Duration>,
}

/// Driver over canned tables.
///
/// `SELECT` returns every seeded row of the named table; `INSERT` reports one
/// affected row per tuple unless overridden. Every statement is recorded.
#[derive(Default)]
pub struct MockDriver {
    state: Mutex<MockState>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_table(self: Arc<Self>, shape: TableShape, rows: Rows) -> Arc<Self> {
        {
            let mut state = self.state.lock();
            state.rows.insert(shape.table_name.clone(), rows);
            state.tables.push(shape);
        }
        self
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn set_fail_rollback(&self, fail: bool) {
        self.state.lock().fail_rollback = fail;
    }

    pub fn set_affected_rows(&self, affected: Option<u64>) {
        self.state.lock().affected_override = affected;
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    async fn enter(&self) -> EngineResult<()> {
        let (delay, unreachable) = {
            let state = self.state.lock();
            (state.delay, state.unreachable)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unreachable {
            return Err(EngineError::connection_failed("connection refused"));
        }
        Ok(())
    }

    fn select(&self, sql: &str) -> QueryResult {
        let state = self.state.lock();
        let table = sql
            .split("FROM \"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap_or_default();

        let Some(shape) = state.tables.iter().find(|t| t.table_name == table) else {
            return QueryResult::empty();
        };
        let columns: Vec<ColumnInfo> = shape
            .columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.name.clone(),
                data_type: c.native_type.clone(),
                nullable: c.nullable,
            })
            .collect();
        let rows = state
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .map(|row| Row {
                        values: columns
                            .iter()
                            .map(|c| row.get(&c.name).cloned().unwrap_or(Value::Null))
                            .collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        QueryResult {
            columns,
            rows,
            affected_rows: None,
            execution_time_ms: 0.0,
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn driver_id(&self) -> &'static str {
        MOCK_BACKEND
    }

    fn driver_name(&self) -> &'static str {
        "Mock"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    async fn discover(&self) -> EngineResult<Vec<TableShape>> {
        self.enter().await?;
        Ok(self.state.lock().tables.clone())
    }

    async fn execute(&self, sql: &str) -> EngineResult<QueryResult> {
        self.enter().await?;
        self.state.lock().executed.push(sql.to_string());

        if sql.starts_with("SELECT") {
            return Ok(self.select(sql));
        }
        if sql.starts_with("INSERT") {
            let tuples = sql.matches("), (").count() as u64 + 1;
            let affected = self.state.lock().affected_override.unwrap_or(tuples);
            return Ok(QueryResult::with_affected_rows(affected, 0.0));
        }
        Ok(QueryResult::with_affected_rows(0, 0.0))
    }

    async fn commit(&self) -> EngineResult<()> {
        self.enter().await?;
        self.state.lock().commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> EngineResult<()> {
        self.enter().await?;
        let mut state = self.state.lock();
        state.rollbacks += 1;
        if state.fail_rollback {
            return Err(EngineError::transaction_error("rollback rejected"));
        }
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }
}

/// Hands out pre-built mock drivers keyed by endpoint address.
#[derive(Default)]
pub struct MockFactory {
    drivers: Mutex<HashMap<String, Arc<MockDriver>>>,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, address: &str, driver: Arc<MockDriver>) {
        self.drivers.lock().insert(address.to_string(), driver);
    }
}

impl DriverFactory for MockFactory {
    fn driver_id(&self) -> &'static str {
        MOCK_BACKEND
    }

    fn build(&self, config: &ConnectionConfig) -> EngineResult<Arc<dyn Driver>> {
        let driver = self
            .drivers
            .lock()
            .get(&config.host)
            .cloned()
            .ok_or_else(|| EngineError::connection_failed(format!("no mock at {}", config.host)))?;
        Ok(driver)
    }
}

/// Locator whose endpoint list tests can change between discoveries.
#[derive(Default)]
pub struct MockLocator {
    endpoints: Mutex<Vec<Endpoint>>,
}

impl MockLocator {
    pub fn new(endpoints: Vec<Endpoint>) -> Arc<Self> {
        Arc::new(Self {
            endpoints: Mutex::new(endpoints),
        })
    }

    pub fn set(&self, endpoints: Vec<Endpoint>) {
        *self.endpoints.lock() = endpoints;
    }
}

#[async_trait]
impl NodeLocator for MockLocator {
    async fn list_endpoints(&self) -> EngineResult<Vec<Endpoint>> {
        Ok(self.endpoints.lock().clone())
    }
}

pub fn mock_endpoint(address: &str) -> Endpoint {
    Endpoint::new(address, address).backend(MOCK_BACKEND)
}

pub fn fast_timeouts() -> Timeouts {
    Timeouts {
        driver_ms: 200,
        discovery_ms: 200,
    }
}

/// Node over `driver` whose id derives from `handle`.
pub fn mock_node(handle: &str, driver: Arc<MockDriver>) -> Node {
    Node::new(NodeId::from_handle(handle), handle, driver).with_timeouts(fast_timeouts())
}

pub fn users_shape() -> TableShape {
    TableShape::new("users")
        .column(ColumnShape::new("id", "integer").not_null())
        .column(ColumnShape::new("name", "text"))
}

pub fn orders_shape() -> TableShape {
    TableShape::new("orders")
        .column(ColumnShape::new("id", "integer").not_null())
        .column(ColumnShape::new("user_id", "integer").references("users"))
}

pub fn row(values: &[(&str, Value)]) -> BTreeMap<String, Value> {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
