// SPDX-License-Identifier: Apache-2.0

//! SQLite Driver
//!
//! Implements the Driver trait for SQLite databases using SQLx.
//!
//! ## SQLite Specifics
//!
//! - `database` in ConnectionConfig holds the file path (`host` is used when
//!   it is absent); `:memory:` is accepted
//! - Uses WAL mode for better concurrency
//! - Discovery reads `sqlite_master` and the `table_info` / `foreign_key_list`
//!   pragmas
//!
//! ## Transaction Handling
//!
//! A dedicated connection is acquired from the pool and `BEGIN` issued on the
//! first writing `execute`; it is released on COMMIT/ROLLBACK. Reads issued
//! while no transaction is open run on a pooled connection in autocommit.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool,
    SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row, TypeInfo};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{is_read_only, map_sqlx_error, returns_rows};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::registry::DriverFactory;
use crate::engine::sql_generator::SqlDialect;
use crate::engine::traits::Driver;
use crate::engine::types::{
    ColumnInfo, ColumnShape, ConnectionConfig, QueryResult, Row as QRow, TableShape, Value,
};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u32 = 30;

/// SQLite driver bound to one database file
pub struct SqliteDriver {
    pool: SqlitePool,
    transaction_conn: Mutex<Option<PoolConnection<Sqlite>>>,
    db_path: String,
}

impl SqliteDriver {
    /// Binds a lazily connected pool; the file is opened on first use.
    pub fn new(config: &ConnectionConfig) -> EngineResult<Self> {
        let db_path = Self::db_path(config)?;
        let opts = Self::build_connect_options(&db_path)?;

        // every connection to `:memory:` is a distinct database
        let max_connections = if db_path == ":memory:" {
            1
        } else {
            config.pool_max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS)
        };
        let acquire_timeout = config
            .pool_acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(acquire_timeout as u64))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_lazy_with(opts);

        Ok(Self {
            pool,
            transaction_conn: Mutex::new(None),
            db_path,
        })
    }

    pub fn db_path(config: &ConnectionConfig) -> EngineResult<String> {
        let path = config
            .database
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(&config.host)
            .trim();

        if path.is_empty() {
            return Err(EngineError::validation("SQLite database path is empty"));
        }
        Ok(path.to_string())
    }

    fn build_connect_options(path: &str) -> EngineResult<SqliteConnectOptions> {
        let opts = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| EngineError::connection_failed(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };

        Ok(opts
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30)))
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(sqlite_row: &SqliteRow) -> QRow {
        let values: Vec<Value> = sqlite_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(sqlite_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a SqliteRow at the given index
    ///
    /// SQLite has dynamic typing, so we try multiple types in order of likelihood
    fn extract_value(row: &SqliteRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v.map(Value::Float).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn get_column_info(row: &SqliteRow) -> Vec<ColumnInfo> {
        row.columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
                nullable: true, // not exposed by row metadata
            })
            .collect()
    }

    async fn discover_on(conn: &mut SqliteConnection) -> EngineResult<Vec<TableShape>> {
        let tables: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT name
            FROM sqlite_master
            WHERE type = 'table'
            AND name NOT LIKE 'sqlite_%'
            ORDER BY name
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        let mut shapes = Vec::with_capacity(tables.len());
        for (table,) in tables {
            let column_rows: Vec<(String, String, i64)> = sqlx::query_as(
                r#"SELECT name, type, "notnull" FROM pragma_table_info(?1) ORDER BY cid"#,
            )
            .bind(&table)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

            let fk_rows: Vec<(String, String)> = sqlx::query_as(
                r#"SELECT "from", "table" FROM pragma_foreign_key_list(?1) ORDER BY id, seq"#,
            )
            .bind(&table)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

            let columns = column_rows
                .into_iter()
                .map(|(name, native_type, notnull)| {
                    let target = fk_rows
                        .iter()
                        .find(|(from, _)| *from == name)
                        .map(|(_, target)| target.clone());
                    ColumnShape {
                        name,
                        native_type,
                        nullable: notnull == 0,
                        foreign_key_target: target,
                    }
                })
                .collect();

            shapes.push(TableShape {
                table_name: table,
                columns,
            });
        }

        Ok(shapes)
    }

    async fn run(conn: &mut SqliteConnection, sql: &str) -> EngineResult<QueryResult> {
        let start = Instant::now();

        if returns_rows(sql) {
            let sqlite_rows: Vec<SqliteRow> = sqlx::query(sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;

            let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
            let columns = sqlite_rows
                .first()
                .map(Self::get_column_info)
                .unwrap_or_default();
            let rows: Vec<QRow> = sqlite_rows.iter().map(Self::convert_row).collect();

            Ok(QueryResult {
                columns,
                rows,
                affected_rows: None,
                execution_time_ms,
            })
        } else {
            let result = sqlx::query(sql)
                .execute(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;

            let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
            Ok(QueryResult::with_affected_rows(
                result.rows_affected(),
                execution_time_ms,
            ))
        }
    }

    async fn finish(&self, statement: &str) -> EngineResult<()> {
        let mut tx = self.transaction_conn.lock().await;

        let Some(mut conn) = tx.take() else {
            return Ok(());
        };

        sqlx::query(statement)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                EngineError::transaction_error(format!("Failed to {} transaction: {}", statement, e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn driver_id(&self) -> &'static str {
        "sqlite"
    }

    fn driver_name(&self) -> &'static str {
        "SQLite"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Sqlite
    }

    #[instrument(skip(self), fields(db = %self.db_path))]
    async fn discover(&self) -> EngineResult<Vec<TableShape>> {
        let mut tx = self.transaction_conn.lock().await;

        // a single-connection pool is held by the open transaction
        match tx.as_mut() {
            Some(conn) => Self::discover_on(conn).await,
            None => {
                let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
                Self::discover_on(&mut conn).await
            }
        }
    }

    async fn execute(&self, sql: &str) -> EngineResult<QueryResult> {
        let mut tx = self.transaction_conn.lock().await;

        // reads outside a transaction see the latest committed rows
        if tx.is_none() && is_read_only(sql) {
            let mut conn = self.pool.acquire().await.map_err(map_sqlx_error)?;
            return Self::run(&mut conn, sql).await;
        }

        if tx.is_none() {
            let mut conn = self.pool.acquire().await.map_err(|e| {
                EngineError::connection_failed(format!(
                    "Failed to acquire connection for transaction: {}",
                    e
                ))
            })?;

            sqlx::query("BEGIN")
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    EngineError::transaction_error(format!("Failed to begin transaction: {}", e))
                })?;

            debug!(db = %self.db_path, "Transaction opened");
            *tx = Some(conn);
        }

        match tx.as_mut() {
            Some(conn) => Self::run(conn, sql).await,
            None => Err(EngineError::internal("transaction connection missing")),
        }
    }

    async fn commit(&self) -> EngineResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> EngineResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn close(&self) -> EngineResult<()> {
        if let Err(e) = self.rollback().await {
            debug!(db = %self.db_path, error = %e, "Rollback on close failed");
        }
        self.pool.close().await;
        Ok(())
    }
}

/// Builds [`SqliteDriver`]s
pub struct SqliteFactory;

impl DriverFactory for SqliteFactory {
    fn driver_id(&self) -> &'static str {
        "sqlite"
    }

    fn build(&self, config: &ConnectionConfig) -> EngineResult<Arc<dyn Driver>> {
        Ok(Arc::new(SqliteDriver::new(config)?))
    }
}
