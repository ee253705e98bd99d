// SPDX-License-Identifier: Apache-2.0

//! Driver trait definition
//!
//! The adapter every backend implements. A node owns exactly one driver and
//! talks to its backend only through this interface.

use async_trait::async_trait;
use tracing::debug;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::sql_generator::{generate_create_table, SqlDialect};
use crate::engine::types::{QueryResult, TableShape};

/// Per-backend adapter bound to one database.
///
/// `execute` runs inside a transaction the driver opens implicitly on first
/// use; `commit` and `rollback` end it and are no-ops when none is open.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Returns the unique identifier for this driver (e.g., "postgres", "sqlite")
    fn driver_id(&self) -> &'static str;

    /// Returns a human-readable name for this driver
    fn driver_name(&self) -> &'static str;

    /// Quoting and literal rules of the backend
    fn dialect(&self) -> SqlDialect;

    /// Lists every user table with its columns and foreign keys
    async fn discover(&self) -> EngineResult<Vec<TableShape>>;

    /// Executes one statement and returns its rows and affected-row count
    async fn execute(&self, sql: &str) -> EngineResult<QueryResult>;

    async fn commit(&self) -> EngineResult<()>;

    async fn rollback(&self) -> EngineResult<()>;

    /// Materializes `shape` as a table.
    ///
    /// An existing table of the same name with a compatible shape is left
    /// alone; an incompatible one is a `SchemaConflict`.
    async fn create_table(&self, shape: &TableShape) -> EngineResult<()> {
        let existing = self.discover().await?;

        if let Some(found) = existing
            .iter()
            .find(|t| t.table_name.eq_ignore_ascii_case(&shape.table_name))
        {
            return match shape.incompatibility_with(found) {
                None => {
                    debug!(table = %shape.table_name, "Table already exists with same shape");
                    Ok(())
                }
                Some(reason) => Err(EngineError::schema_conflict(&shape.table_name, reason)),
            };
        }

        let sql = generate_create_table(self.dialect(), shape)?;
        self.execute(&sql).await?;
        self.commit().await
    }

    /// Releases pooled connections
    async fn close(&self) -> EngineResult<()> {
        Ok(())
    }
}
