// SPDX-License-Identifier: Apache-2.0

// dorm - federated model layer over relational nodes
// Core library

pub mod config;
pub mod engine;
pub mod federation;
pub mod metrics;
pub mod observability;
pub mod schema;

pub use config::{FederationConfig, Timeouts};
pub use engine::{
    BackendKind, ColumnFilter, ColumnShape, Driver, DriverFactory, DriverRegistry, EngineError,
    EngineResult, FilterOperator, NodeId, TableShape, Value,
};
pub use federation::{
    Endpoint, FanoutReport, FederatedQuery, ModelQuery, Node, NodeLocator, NodeRegistry,
    Placement, Record, RecordStream, ReplicaWritePolicy, StaticLocator,
};
pub use schema::{Field, FieldKind, Model, ModelInstance, Schema};
