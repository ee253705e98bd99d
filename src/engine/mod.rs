// SPDX-License-Identifier: Apache-2.0

// Data Engine Module
// Driver abstraction, SQL generation and the shared value types

pub mod drivers;
pub mod error;
pub mod registry;
pub mod sql_generator;
pub mod traits;
pub mod types;

pub use error::{EngineError, EngineResult, NodeFailure};
pub use registry::{DriverFactory, DriverRegistry};
pub use sql_generator::SqlDialect;
pub use traits::Driver;
pub use types::*;
