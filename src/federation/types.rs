// SPDX-License-Identifier: Apache-2.0

//! Types shared by the registry and federated queries.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::error::{EngineError, EngineResult, NodeFailure};
use crate::engine::types::{NodeId, Value};

/// Where `create_model` materializes a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "nodes")]
pub enum Placement {
    Node(NodeId),
    Nodes(Vec<NodeId>),
    /// Every non-replica node
    #[default]
    Primaries,
    /// Every node, replicas subject to [`ReplicaWritePolicy`]
    All,
}

/// Whether writes may target replica nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaWritePolicy {
    #[default]
    Reject,
    Allow,
}

impl ReplicaWritePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" | "deny" => Some(Self::Reject),
            "allow" => Some(Self::Allow),
            _ => None,
        }
    }
}

/// One row of a federated result.
///
/// Columns keep the order the node returned them in, which follows the
/// query's `select` list when one was given.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub node: NodeId,
    pub model: String,
    #[serde(serialize_with = "serialize_columns")]
    pub values: Vec<(String, Value)>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(name, _)| name.as_str())
    }
}

fn serialize_columns<S>(values: &[(String, Value)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_map(values.iter().map(|(name, value)| (name, value)))
}

/// Why a node took no part in a multi-node operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Replica,
    MissingModel,
    Cancelled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::Replica => "replica",
            SkipReason::MissingModel => "model not present",
            SkipReason::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedNode {
    pub node: NodeId,
    pub address: String,
    pub reason: SkipReason,
}

/// Per-node outcome of an operation that fans out over several nodes.
#[derive(Debug, Serialize)]
pub struct FanoutReport<T> {
    pub succeeded: Vec<(NodeId, T)>,
    pub failed: Vec<NodeFailure>,
    pub skipped: Vec<SkippedNode>,
}

impl<T> Default for FanoutReport<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> FanoutReport<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self, node: NodeId, value: T) {
        self.succeeded.push((node, value));
    }

    pub fn failure(&mut self, node: NodeId, address: impl Into<String>, error: EngineError) {
        self.failed.push(NodeFailure {
            node,
            address: address.into(),
            error,
        });
    }

    pub fn skip(&mut self, node: NodeId, address: impl Into<String>, reason: SkipReason) {
        self.skipped.push(SkippedNode {
            node,
            address: address.into(),
            reason,
        });
    }

    /// No failures and no skips.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// At least one node was attempted and none succeeded.
    pub fn all_failed(&self) -> bool {
        self.succeeded.is_empty() && !self.failed.is_empty()
    }

    pub fn succeeded_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.succeeded.iter().map(|(id, _)| *id)
    }

    /// Turns an all-failed report into `AllNodesFailed`.
    pub fn into_result(self, operation: &str) -> EngineResult<Self> {
        if self.all_failed() {
            return Err(EngineError::AllNodesFailed {
                operation: operation.to_string(),
                failures: self.failed,
            });
        }
        Ok(self)
    }
}
