// SPDX-License-Identifier: Apache-2.0

//! Node registry
//!
//! The set of nodes currently taking part in the federation, keyed by
//! [`NodeId`]. Discovery asks the locator for endpoints and synthesizes every
//! node's schema concurrently; model lookups, placement and writes are all
//! resolved against the index built here.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::FederationConfig;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::registry::DriverRegistry;
use crate::engine::types::NodeId;
use crate::metrics;
use crate::schema::{Model, ModelInstance, Schema};

use super::locator::{NodeLocator, StaticLocator};
use super::node::Node;
use super::query::FederatedQuery;
use super::types::{FanoutReport, Placement, ReplicaWritePolicy, SkipReason};

type DiscoveryOutcome = (Arc<Node>, EngineResult<Arc<Schema>>);

pub struct NodeRegistry {
    config: FederationConfig,
    drivers: Arc<DriverRegistry>,
    locator: Arc<dyn NodeLocator>,
    nodes: RwLock<BTreeMap<NodeId, Arc<Node>>>,
}

impl NodeRegistry {
    pub fn new(config: FederationConfig, locator: Arc<dyn NodeLocator>) -> Self {
        Self::with_drivers(config, locator, Arc::new(DriverRegistry::with_builtin()))
    }

    pub fn with_drivers(
        config: FederationConfig,
        locator: Arc<dyn NodeLocator>,
        drivers: Arc<DriverRegistry>,
    ) -> Self {
        Self {
            config,
            drivers,
            locator,
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registry over the endpoints listed in `config`.
    pub fn from_config(config: FederationConfig) -> EngineResult<Self> {
        let locator = StaticLocator::from_urls(&config.endpoints)?;
        Ok(Self::new(config, Arc::new(locator)))
    }

    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.drivers
    }

    /// Registered nodes in id order.
    pub async fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.read().await.get(&id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    pub async fn discover_nodes(&self) -> EngineResult<FanoutReport<usize>> {
        self.discover_nodes_with(CancellationToken::new()).await
    }

    /// Rebuilds the node set from the locator.
    ///
    /// Succeeds with a per-node report unless every endpoint failed. After a
    /// complete run the index holds exactly the observed nodes: endpoints that
    /// disappeared are closed and dropped, known nodes that failed to answer
    /// keep their previous schema. When `cancel` fires, unfinished nodes are
    /// aborted and reported as skipped, finished ones are merged in and
    /// nothing is removed.
    #[instrument(skip(self, cancel))]
    pub async fn discover_nodes_with(
        &self,
        cancel: CancellationToken,
    ) -> EngineResult<FanoutReport<usize>> {
        let endpoints = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            endpoints = self.locator.list_endpoints() => endpoints?,
        };

        let existing = self.nodes.read().await.clone();
        let mut report = FanoutReport::new();
        let mut observed: BTreeMap<NodeId, Arc<Node>> = BTreeMap::new();
        let mut seen = HashSet::new();
        let mut tasks: JoinSet<DiscoveryOutcome> = JoinSet::new();

        for endpoint in endpoints {
            let id = endpoint.node_id();
            if !seen.insert(id) {
                debug!(node = %id.short(), handle = %endpoint.handle, "Duplicate endpoint skipped");
                continue;
            }

            let node = match existing.get(&id) {
                Some(node) => Arc::clone(node),
                None => match Node::from_endpoint(&endpoint, &self.config, &self.drivers) {
                    Ok(node) => Arc::new(node),
                    Err(e) => {
                        warn!(address = %endpoint.address, error = %e, "Failed to build node");
                        report.failure(id, endpoint.address, e);
                        continue;
                    }
                },
            };

            observed.insert(id, Arc::clone(&node));
            tasks.spawn(async move {
                let result = node.discover_schema().await;
                (node, result)
            });
        }

        let mut ready: Vec<Arc<Node>> = Vec::new();
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    tasks.abort_all();
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((node, Ok(schema)))) => {
                        report.success(node.id(), schema.len());
                        ready.push(node);
                    }
                    Some(Ok((node, Err(e)))) => {
                        warn!(node = %node.id().short(), error = %e, "Schema discovery failed");
                        report.failure(node.id(), node.address(), e);
                    }
                    Some(Err(join_err)) if join_err.is_cancelled() => {}
                    Some(Err(join_err)) => {
                        warn!(error = %join_err, "Discovery task panicked");
                    }
                },
            }
        }

        // Nodes that produced neither a schema nor an error
        let answered: HashSet<NodeId> = report
            .succeeded_nodes()
            .chain(report.failed.iter().map(|f| f.node))
            .collect();
        for node in observed.values().filter(|n| !answered.contains(&n.id())) {
            if cancelled {
                report.skip(node.id(), node.address(), SkipReason::Cancelled);
            } else {
                report.failure(
                    node.id(),
                    node.address(),
                    EngineError::internal("discovery task did not complete"),
                );
            }
        }

        if cancelled {
            metrics::record_cancel();
            let mut nodes = self.nodes.write().await;
            for node in ready {
                nodes.insert(node.id(), node);
            }
            info!(
                merged = report.succeeded.len(),
                skipped = report.skipped.len(),
                "Discovery cancelled"
            );
            return Ok(report);
        }

        let report = report.into_result("discover_nodes")?;

        // New nodes that never answered are not registered
        let failed: HashSet<NodeId> = report.failed.iter().map(|f| f.node).collect();
        observed.retain(|id, _| !failed.contains(id) || existing.contains_key(id));

        let dropped: Vec<Arc<Node>> = {
            let mut nodes = self.nodes.write().await;
            let previous = std::mem::replace(&mut *nodes, observed);
            previous
                .into_iter()
                .filter(|(id, _)| !nodes.contains_key(id))
                .map(|(_, node)| node)
                .collect()
        };

        for node in &dropped {
            if let Err(e) = node.close().await {
                warn!(node = %node.id().short(), error = %e, "Failed to close dropped node");
            }
        }

        info!(
            nodes = report.succeeded.len(),
            failed = report.failed.len(),
            dropped = dropped.len(),
            "Discovery complete"
        );
        Ok(report)
    }

    /// Adds `node`, replacing and returning any node with the same id.
    pub async fn register_node(&self, node: impl Into<Arc<Node>>) -> Option<Arc<Node>> {
        let node = node.into();
        let id = node.id();
        let previous = self.nodes.write().await.insert(id, node);
        if previous.is_some() {
            let err = EngineError::DuplicateNode { node: id };
            warn!(error = %err, "Node replaced");
        }
        previous
    }

    /// Removes a node without closing its driver.
    pub async fn remove_node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.write().await.remove(&id)
    }

    /// Query over every non-replica node holding a model for `table`.
    ///
    /// Matching goes through the model name, so `"users"`, `"Users"` and
    /// `"USERS"` find the same models. No match is an empty query, not an
    /// error.
    pub async fn find_model(&self, table: &str) -> FederatedQuery {
        let nodes = self.nodes.read().await;
        let targets = nodes
            .values()
            .filter(|node| !node.is_replica())
            .filter_map(|node| node.model(table).map(|m| (Arc::clone(node), m)))
            .collect();
        FederatedQuery::new(table, targets)
    }

    async fn resolve_placement(&self, placement: &Placement) -> EngineResult<Vec<Arc<Node>>> {
        let nodes = self.nodes.read().await;
        let lookup = |id: &NodeId| {
            nodes
                .get(id)
                .cloned()
                .ok_or_else(|| EngineError::validation(format!("Unknown node {}", id)))
        };

        match placement {
            Placement::Node(id) => Ok(vec![lookup(id)?]),
            Placement::Nodes(ids) => ids.iter().map(lookup).collect(),
            Placement::Primaries => Ok(nodes
                .values()
                .filter(|n| !n.is_replica())
                .cloned()
                .collect()),
            Placement::All => Ok(nodes.values().cloned().collect()),
        }
    }

    fn writable(&self, node: &Node) -> bool {
        !node.is_replica() || self.config.replica_writes == ReplicaWritePolicy::Allow
    }

    /// Creates `model`'s table on the nodes picked by `target`, or by the
    /// configured default placement.
    #[instrument(skip(self, model, target), fields(table = %model.table_name()))]
    pub async fn create_model(
        &self,
        model: &Model,
        target: Option<Placement>,
    ) -> EngineResult<FanoutReport<()>> {
        let placement = target.unwrap_or_else(|| self.config.default_placement.clone());
        let candidates = self.resolve_placement(&placement).await?;

        let mut report = FanoutReport::new();
        let mut writable = Vec::new();
        for node in candidates {
            if self.writable(&node) {
                writable.push(node);
            } else {
                report.skip(node.id(), node.address(), SkipReason::Replica);
            }
        }

        if writable.is_empty() {
            return Err(EngineError::validation(format!(
                "No writable node for '{}' under placement {:?}",
                model.table_name(),
                placement
            )));
        }

        let results = join_all(writable.iter().map(|node| async move {
            (node, node.create_table(model).await)
        }))
        .await;

        for (node, result) in results {
            match result {
                Ok(()) => report.success(node.id(), ()),
                Err(e) => report.failure(node.id(), node.address(), e),
            }
        }

        report.into_result("create_model")
    }

    pub async fn save_instance(
        &self,
        instance: &ModelInstance,
        target: Option<NodeId>,
    ) -> EngineResult<FanoutReport<u64>> {
        self.save_batch(std::slice::from_ref(instance), target).await
    }

    /// Writes `instances` to `target`, or to every node holding their model.
    ///
    /// Nodes without the model, and replicas unless replica writes are
    /// allowed, are reported as skipped. `UnknownModel` when no node took the
    /// batch.
    #[instrument(skip(self, instances, target), fields(rows = instances.len()))]
    pub async fn save_batch(
        &self,
        instances: &[ModelInstance],
        target: Option<NodeId>,
    ) -> EngineResult<FanoutReport<u64>> {
        let Some(first) = instances.first() else {
            return Ok(FanoutReport::new());
        };
        let model_name = first.model();

        let candidates = match target {
            Some(id) => vec![self
                .node(id)
                .await
                .ok_or_else(|| EngineError::validation(format!("Unknown node {}", id)))?],
            None => self.nodes().await,
        };

        let mut report = FanoutReport::new();
        let mut accepting = Vec::new();
        let mut replicas = Vec::new();
        for node in candidates {
            if !node.has_model(model_name) {
                debug!(node = %node.id().short(), model = %model_name, "Model not found on node");
                report.skip(node.id(), node.address(), SkipReason::MissingModel);
            } else if !self.writable(&node) {
                replicas.push(node.address().to_string());
                report.skip(node.id(), node.address(), SkipReason::Replica);
            } else {
                accepting.push(node);
            }
        }

        if accepting.is_empty() {
            if replicas.is_empty() {
                return Err(EngineError::unknown_model(model_name));
            }
            return Err(EngineError::validation(format!(
                "'{}' is only held by replicas ({}) and replica writes are rejected",
                model_name,
                replicas.join(", ")
            )));
        }

        let results = join_all(accepting.iter().map(|node| async move {
            (node, node.insert(instances).await)
        }))
        .await;

        for (node, result) in results {
            match result {
                Ok(rows) => report.success(node.id(), rows),
                Err(e) => {
                    warn!(node = %node.id().short(), error = %e, "Insert failed");
                    report.failure(node.id(), node.address(), e)
                }
            }
        }

        report.into_result("save_instance")
    }

    /// Rolls back every node's open transaction, best effort.
    ///
    /// Every node is attempted; the call fails only when none succeeded.
    #[instrument(skip(self))]
    pub async fn rollback_all(&self) -> EngineResult<FanoutReport<()>> {
        let nodes = self.nodes().await;
        let results = join_all(
            nodes
                .iter()
                .map(|node| async move { (node, node.rollback().await) }),
        )
        .await;

        let mut report = FanoutReport::new();
        for (node, result) in results {
            match result {
                Ok(()) => report.success(node.id(), ()),
                Err(e) => {
                    warn!(node = %node.id().short(), error = %e, "Rollback failed");
                    report.failure(node.id(), node.address(), e);
                }
            }
        }
        report.into_result("rollback_all")
    }

    /// Closes every driver and empties the index.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> FanoutReport<()> {
        let nodes = std::mem::take(&mut *self.nodes.write().await);

        let mut report = FanoutReport::new();
        for node in nodes.into_values() {
            match node.close().await {
                Ok(()) => report.success(node.id(), ()),
                Err(e) => report.failure(node.id(), node.address(), e),
            }
        }
        info!(closed = report.succeeded.len(), "Registry shut down");
        report
    }
}
