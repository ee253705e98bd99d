// SPDX-License-Identifier: Apache-2.0

//! Node
//!
//! One database instance taking part in the federation. A node owns exactly
//! one driver, publishes the schema synthesized from that driver's discovery
//! payload, and writes instances into its tables.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::{FederationConfig, Timeouts};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::registry::DriverRegistry;
use crate::engine::sql_generator::generate_insert_batch;
use crate::engine::traits::Driver;
use crate::engine::types::{BackendKind, NodeId, QueryResult};
use crate::metrics;
use crate::schema::{Model, ModelInstance, Schema};

use super::locator::Endpoint;
use super::query::ModelQuery;
use super::types::Record;

pub struct Node {
    id: NodeId,
    address: String,
    port: u16,
    backend: BackendKind,
    database: Option<String>,
    replica: bool,
    driver: Arc<dyn Driver>,
    schema: RwLock<Arc<Schema>>,
    timeouts: Timeouts,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("replica", &self.replica)
            .field("models", &self.schema.read().len())
            .finish()
    }
}

impl Node {
    /// A node with an empty schema; call [`Node::discover_schema`] to fill it.
    pub fn new(id: NodeId, address: impl Into<String>, driver: Arc<dyn Driver>) -> Self {
        Self {
            id,
            address: address.into(),
            port: 0,
            backend: BackendKind::from(driver.driver_id()),
            database: None,
            replica: false,
            driver,
            schema: RwLock::new(Arc::new(Schema::empty(Some(id)))),
            timeouts: Timeouts::default(),
        }
    }

    /// Builds the node's driver through `drivers` without contacting the backend.
    pub fn from_endpoint(
        endpoint: &Endpoint,
        config: &FederationConfig,
        drivers: &DriverRegistry,
    ) -> EngineResult<Self> {
        let connection = config.connection_for(endpoint);
        let driver = drivers.build(&connection)?;

        Ok(Self::new(endpoint.node_id(), &endpoint.address, driver)
            .with_port(connection.port)
            .with_backend(connection.driver)
            .with_database(connection.database)
            .with_replica(endpoint.replica)
            .with_timeouts(config.timeouts))
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_database(mut self, database: Option<String>) -> Self {
        self.database = database;
        self
    }

    pub fn with_replica(mut self, replica: bool) -> Self {
        self.replica = replica;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn backend(&self) -> &BackendKind {
        &self.backend
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn is_replica(&self) -> bool {
        self.replica
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    /// Snapshot of the published schema.
    pub fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema.read())
    }

    pub fn models(&self) -> Vec<Model> {
        self.schema.read().models().to_vec()
    }

    pub fn model(&self, name: &str) -> Option<Model> {
        self.schema.read().model(name).cloned()
    }

    pub fn has_model(&self, name: &str) -> bool {
        self.schema.read().contains(name)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.schema
            .read()
            .models()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Runs one driver call under `limit`.
    ///
    /// Expiry and unreachable backends both surface as `DriverUnavailable`.
    async fn call<T, F>(&self, limit: Duration, fut: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>>,
    {
        match timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) if e.is_unreachable() => {
                Err(EngineError::driver_unavailable(&self.address, e.to_string()))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                metrics::record_timeout();
                Err(EngineError::driver_unavailable(
                    &self.address,
                    format!("no response within {}ms", limit.as_millis()),
                ))
            }
        }
    }

    /// Rebuilds the schema from the driver and publishes it.
    ///
    /// On failure the previously published schema stays in place.
    #[instrument(skip(self), fields(node = %self.id.short(), address = %self.address))]
    pub async fn discover_schema(&self) -> EngineResult<Arc<Schema>> {
        metrics::record_discovery();
        let shapes = self
            .call(self.timeouts.discovery(), self.driver.discover())
            .await
            .map_err(|e| match e {
                EngineError::DriverUnavailable { .. } => e,
                other => EngineError::driver_unavailable(&self.address, other.to_string()),
            })?;

        let schema = Arc::new(Schema::build(Some(self.id), shapes));
        for issue in schema.issues() {
            warn!(issue = %issue, "Schema synthesis issue");
        }

        *self.schema.write() = Arc::clone(&schema);
        info!(models = schema.len(), "Schema discovered");

        Ok(schema)
    }

    /// Materializes `model` on this node and adopts it into the schema.
    #[instrument(skip(self, model), fields(node = %self.id.short(), table = %model.table_name()))]
    pub async fn create_table(&self, model: &Model) -> EngineResult<()> {
        let shape = model.to_shape();
        self.call(self.timeouts.driver(), self.driver.create_table(&shape))
            .await?;

        let mut schema = self.schema.write();
        let known = schema
            .models()
            .iter()
            .any(|m| m.table_name() == shape.table_name);
        if !known {
            let updated = Arc::new(schema.with_shape(shape));
            *schema = updated;
        }

        debug!("Table ready");
        Ok(())
    }

    /// Writes `instances` with one multi-row INSERT, then commits.
    ///
    /// Every instance must target the same model and set the same columns.
    /// When the backend reports fewer affected rows than instances the
    /// transaction is left open and `PartialBatch` is returned; the caller
    /// decides whether to roll back.
    #[instrument(skip(self, instances), fields(node = %self.id.short(), rows = instances.len()))]
    pub async fn insert(&self, instances: &[ModelInstance]) -> EngineResult<u64> {
        let Some(first) = instances.first() else {
            return Ok(0);
        };

        if let Some(other) = instances.iter().find(|i| i.model() != first.model()) {
            return Err(EngineError::validation(format!(
                "Batch mixes models '{}' and '{}'",
                first.model(),
                other.model()
            )));
        }

        let model = self
            .model(first.model())
            .ok_or_else(|| EngineError::unknown_model(first.model()))?;

        if let Some(unknown) = first.columns().find(|c| !model.has_field(c)) {
            return Err(EngineError::validation(format!(
                "Model '{}' has no field '{}'",
                model.name(),
                unknown
            )));
        }
        if instances.iter().any(|i| !i.columns().eq(first.columns())) {
            return Err(EngineError::validation(format!(
                "Instances of '{}' set different columns",
                model.name()
            )));
        }

        let columns: Vec<String> = model
            .fields()
            .iter()
            .filter(|f| first.get(&f.name).is_some())
            .map(|f| f.name.clone())
            .collect();
        let rows: Vec<_> = instances.iter().map(|i| i.values()).collect();
        let sql = generate_insert_batch(self.driver.dialect(), model.table_name(), &columns, &rows)?;

        let result = self
            .call(self.timeouts.driver(), self.driver.execute(&sql))
            .await?;

        let submitted = instances.len() as u64;
        let affected = result.affected_rows.unwrap_or(submitted);
        if affected < submitted {
            warn!(submitted, affected, "Partial batch, transaction left open");
            return Err(EngineError::PartialBatch {
                table: model.table_name().to_string(),
                submitted,
                affected,
            });
        }

        self.commit().await?;
        Ok(affected)
    }

    /// Query builder over `model_name` on this node.
    pub fn query(&self, model_name: &str) -> EngineResult<ModelQuery> {
        self.model(model_name)
            .map(|m| ModelQuery::new(&m))
            .ok_or_else(|| EngineError::unknown_model(model_name))
    }

    /// Executes `query` against this node's current model.
    ///
    /// Columns named by the query are checked against the model first.
    pub async fn execute_query(&self, query: &ModelQuery) -> EngineResult<Vec<Record>> {
        let start = Instant::now();
        let result = self.run_query(query).await;

        metrics::record_node_fetch(start.elapsed().as_secs_f64() * 1000.0, result.is_ok());
        result
    }

    async fn run_query(&self, query: &ModelQuery) -> EngineResult<Vec<Record>> {
        let model = self
            .model(query.table_name())
            .ok_or_else(|| EngineError::unknown_model(query.model_name()))?;
        query.validate_against(&model)?;

        let sql = query.to_sql(self.driver.dialect());
        let result: QueryResult = self
            .call(self.timeouts.driver(), self.driver.execute(&sql))
            .await?;

        let names: Vec<String> = result.columns.into_iter().map(|c| c.name).collect();
        Ok(result
            .rows
            .into_iter()
            .map(|row| Record {
                node: self.id,
                model: model.name().to_string(),
                values: names.iter().cloned().zip(row.values).collect(),
            })
            .collect())
    }

    pub async fn commit(&self) -> EngineResult<()> {
        self.call(self.timeouts.driver(), self.driver.commit()).await
    }

    pub async fn rollback(&self) -> EngineResult<()> {
        self.call(self.timeouts.driver(), self.driver.rollback()).await
    }

    pub async fn close(&self) -> EngineResult<()> {
        self.call(self.timeouts.driver(), self.driver.close()).await
    }
}
