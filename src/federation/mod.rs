// SPDX-License-Identifier: Apache-2.0

//! Federation layer
//!
//! Nodes, the registry that discovers them, and queries that fan out over
//! every node holding a model.

pub mod locator;
pub mod node;
pub mod query;
pub mod registry;
pub mod types;

pub use locator::{Endpoint, NodeLocator, StaticLocator};
pub use node::Node;
pub use query::{FederatedQuery, ModelQuery, RecordStream};
pub use registry::NodeRegistry;
pub use types::{FanoutReport, Placement, Record, ReplicaWritePolicy, SkipReason, SkippedNode};
