// SPDX-License-Identifier: Apache-2.0

//! Federated queries
//!
//! A [`FederatedQuery`] pairs every participating node with a per-node
//! [`ModelQuery`]. Builder methods return new values and never touch the
//! receiver, so a base query can be refined several ways. Evaluation starts
//! one task per node and streams their records back in node order.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{ready, Stream, TryStreamExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::sql_generator::{generate_select, SqlDialect};
use crate::engine::types::{ColumnFilter, NodeId, Value};
use crate::metrics;
use crate::schema::Model;

use super::node::Node;
use super::types::Record;

/// Projection, filters and limit for one model on one node.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelQuery {
    model: String,
    table: String,
    columns: Vec<String>,
    filters: Vec<ColumnFilter>,
    limit: Option<u64>,
}

impl ModelQuery {
    pub fn new(model: &Model) -> Self {
        Self {
            model: model.name().to_string(),
            table: model.table_name().to_string(),
            columns: Vec::new(),
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn filters(&self) -> &[ColumnFilter] {
        &self.filters
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    /// Replaces the projection. An empty list selects every column.
    pub fn select<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..self.clone()
        }
    }

    /// Adds a filter; filters are combined with AND.
    pub fn filter(&self, filter: ColumnFilter) -> Self {
        let mut next = self.clone();
        next.filters.push(filter);
        next
    }

    pub fn where_eq(&self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(ColumnFilter::eq(column, value))
    }

    pub fn limit(&self, limit: u64) -> Self {
        Self {
            limit: Some(limit),
            ..self.clone()
        }
    }

    /// Every selected or filtered column must be a field of `model`.
    pub fn validate_against(&self, model: &Model) -> EngineResult<()> {
        let named = self
            .columns
            .iter()
            .chain(self.filters.iter().map(|f| &f.column));
        for column in named {
            if !model.has_field(column) {
                return Err(EngineError::validation(format!(
                    "Model '{}' has no field '{}'",
                    model.name(),
                    column
                )));
            }
        }
        Ok(())
    }

    pub fn to_sql(&self, dialect: SqlDialect) -> String {
        generate_select(dialect, &self.table, &self.columns, &self.filters, self.limit)
    }
}

#[derive(Debug, Clone)]
struct QueryTarget {
    node: Arc<Node>,
    query: ModelQuery,
}

/// Query over one model name across every node that holds it.
///
/// Evaluating it requires a running tokio runtime.
#[derive(Debug, Clone)]
pub struct FederatedQuery {
    model: String,
    targets: Vec<QueryTarget>,
}

impl FederatedQuery {
    pub(crate) fn new(model: impl Into<String>, nodes: Vec<(Arc<Node>, Model)>) -> Self {
        let targets = nodes
            .into_iter()
            .map(|(node, model)| QueryTarget {
                query: ModelQuery::new(&model),
                node,
            })
            .collect();
        Self {
            model: model.into(),
            targets,
        }
    }

    /// The model name the query was requested for.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Participating nodes, in evaluation order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.targets.iter().map(|t| t.node.id()).collect()
    }

    pub fn queries(&self) -> impl Iterator<Item = (NodeId, &ModelQuery)> {
        self.targets.iter().map(|t| (t.node.id(), &t.query))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn map(&self, f: impl Fn(&ModelQuery) -> ModelQuery) -> Self {
        Self {
            model: self.model.clone(),
            targets: self
                .targets
                .iter()
                .map(|t| QueryTarget {
                    node: Arc::clone(&t.node),
                    query: f(&t.query),
                })
                .collect(),
        }
    }

    pub fn select<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        self.map(|q| q.select(columns.iter().cloned()))
    }

    pub fn filter(&self, filter: ColumnFilter) -> Self {
        self.map(|q| q.filter(filter.clone()))
    }

    pub fn where_eq(&self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(ColumnFilter::eq(column, value))
    }

    /// Per-node limit; the merged stream may hold up to `limit` records per node.
    pub fn limit(&self, limit: u64) -> Self {
        self.map(|q| q.limit(limit))
    }

    /// Starts every node's part and streams the merged records.
    pub fn all(&self) -> RecordStream {
        self.all_with(CancellationToken::new())
    }

    /// Like [`Self::all`]; cancelling `cancel` aborts the unfinished nodes
    /// and ends the stream with one `Cancelled` error.
    #[instrument(skip(self, cancel), fields(model = %self.model, nodes = self.targets.len()))]
    pub fn all_with(&self, cancel: CancellationToken) -> RecordStream {
        metrics::record_federated_query();

        let pending = self
            .targets
            .iter()
            .map(|target| {
                let node = Arc::clone(&target.node);
                let query = target.query.clone();
                let token = cancel.clone();
                let node_id = node.id();

                let handle = tokio::spawn(async move {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(EngineError::Cancelled),
                        records = node.execute_query(&query) => records,
                    }
                });

                NodeTask {
                    node: node_id,
                    handle,
                }
            })
            .collect();

        debug!("Federated query started");
        RecordStream {
            pending,
            current: Vec::new().into_iter(),
            cancel,
        }
    }

    /// Collects every record; stops at the first node failure.
    pub async fn fetch_all(&self) -> EngineResult<Vec<Record>> {
        self.all().try_collect().await
    }
}

struct NodeTask {
    node: NodeId,
    handle: JoinHandle<EngineResult<Vec<Record>>>,
}

impl Drop for NodeTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Records of a federated query, node by node.
///
/// A failing node yields one `NodeFailed` item and the stream moves on to
/// the next node. Dropping the stream aborts every unfinished node task.
pub struct RecordStream {
    pending: VecDeque<NodeTask>,
    current: std::vec::IntoIter<Record>,
    cancel: CancellationToken,
}

impl RecordStream {
    /// Nodes whose records have not been yielded yet.
    pub fn remaining_nodes(&self) -> usize {
        self.pending.len()
    }
}

impl Stream for RecordStream {
    type Item = EngineResult<Record>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(record) = this.current.next() {
                return Poll::Ready(Some(Ok(record)));
            }

            if this.cancel.is_cancelled() {
                if this.pending.is_empty() {
                    return Poll::Ready(None);
                }
                this.pending.clear();
                metrics::record_cancel();
                return Poll::Ready(Some(Err(EngineError::Cancelled)));
            }

            let Some(task) = this.pending.front_mut() else {
                return Poll::Ready(None);
            };
            let joined = ready!(Pin::new(&mut task.handle).poll(cx));
            let node = task.node;
            this.pending.pop_front();

            match joined {
                Ok(Ok(records)) => this.current = records.into_iter(),
                Ok(Err(EngineError::Cancelled)) => continue,
                Ok(Err(e)) => return Poll::Ready(Some(Err(EngineError::node_failed(node, e)))),
                Err(join_err) => {
                    let reason = if join_err.is_cancelled() {
                        EngineError::Cancelled
                    } else {
                        EngineError::internal(format!("node task panicked: {}", join_err))
                    };
                    return Poll::Ready(Some(Err(EngineError::node_failed(node, reason))));
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.current.len(), None)
    }
}
