// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for dorm
//!
//! Driver-specific failures are mapped onto these variants so that nodes,
//! the registry and federated queries report errors uniformly.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::types::NodeId;

/// Unified error type for every engine and federation operation
#[derive(Debug, Error, Serialize, Deserialize)]
pub enum EngineError {
    #[error("Node {node} unavailable: {message}")]
    DriverUnavailable { node: String, message: String },

    #[error("Schema conflict on table '{table}': {message}")]
    SchemaConflict { table: String, message: String },

    #[error("Partial batch on '{table}': {affected} of {submitted} rows written")]
    PartialBatch {
        table: String,
        submitted: u64,
        affected: u64,
    },

    #[error("Unknown model: {model}")]
    UnknownModel { model: String },

    #[error("Duplicate node id {node}: previous entry replaced")]
    DuplicateNode { node: NodeId },

    #[error("Node {node} failed: {reason}")]
    NodeFailed {
        node: NodeId,
        reason: Box<EngineError>,
    },

    #[error("{operation} failed on all {} node(s)", failures.len())]
    AllNodesFailed {
        operation: String,
        failures: Vec<NodeFailure>,
    },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Query syntax error: {message}")]
    SyntaxError { message: String },

    #[error("Query execution error: {message}")]
    ExecutionError { message: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Driver not found: {driver_id}")]
    DriverNotFound { driver_id: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Transaction error: {message}")]
    TransactionError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("Feature not supported: {message}")]
    NotSupported { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn driver_unavailable(node: impl fmt::Display, msg: impl Into<String>) -> Self {
        Self::DriverUnavailable {
            node: node.to_string(),
            message: msg.into(),
        }
    }

    pub fn schema_conflict(table: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SchemaConflict {
            table: table.into(),
            message: msg.into(),
        }
    }

    pub fn unknown_model(model: impl Into<String>) -> Self {
        Self::UnknownModel {
            model: model.into(),
        }
    }

    pub fn node_failed(node: NodeId, reason: EngineError) -> Self {
        Self::NodeFailed {
            node,
            reason: Box::new(reason),
        }
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: msg.into() }
    }

    pub fn syntax_error(msg: impl Into<String>) -> Self {
        Self::SyntaxError { message: msg.into() }
    }

    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError { message: msg.into() }
    }

    pub fn driver_not_found(id: impl Into<String>) -> Self {
        Self::DriverNotFound { driver_id: id.into() }
    }

    pub fn transaction_error(msg: impl Into<String>) -> Self {
        Self::TransactionError { message: msg.into() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError { message: msg.into() }
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// True when the failure means the backend could not be reached at all,
    /// as opposed to the backend rejecting a statement.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::DriverUnavailable { .. } | Self::ConnectionFailed { .. } | Self::Timeout { .. }
        )
    }
}

/// One node's failure inside a multi-node operation.
#[derive(Debug, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: NodeId,
    pub address: String,
    pub error: EngineError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.node, self.address, self.error)
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
