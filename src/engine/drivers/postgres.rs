// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL Driver
//!
//! Implements the Driver trait for PostgreSQL using SQLx. Discovery reads
//! `information_schema` for the connection's current schema.
//!
//! ## Transaction Handling
//!
//! A dedicated connection is acquired from the pool and `BEGIN` issued on the
//! first writing `execute`; it is released on COMMIT/ROLLBACK. Reads issued
//! while no transaction is open run on a pooled connection in autocommit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Column, Row, TypeInfo};
use tokio::sync::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

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
const DEFAULT_DATABASE: &str = "postgres";

/// PostgreSQL driver bound to one database
pub struct PostgresDriver {
    pool: PgPool,
    transaction_conn: Mutex<Option<PoolConnection<Postgres>>>,
    target: String,
}

impl PostgresDriver {
    /// Binds a lazily connected pool; nothing is dialed until first use.
    pub fn new(config: &ConnectionConfig) -> EngineResult<Self> {
        if config.host.trim().is_empty() {
            return Err(EngineError::validation("PostgreSQL host is empty"));
        }

        let opts = Self::build_connect_options(config);
        let pool = PgPoolOptions::new()
            .max_connections(
                config
                    .pool_max_connections
                    .unwrap_or(DEFAULT_MAX_CONNECTIONS)
                    .max(1),
            )
            .acquire_timeout(Duration::from_secs(
                config
                    .pool_acquire_timeout_secs
                    .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS) as u64,
            ))
            .connect_lazy_with(opts);

        Ok(Self {
            pool,
            transaction_conn: Mutex::new(None),
            target: Self::describe_target(config),
        })
    }

    fn build_connect_options(config: &ConnectionConfig) -> PgConnectOptions {
        let port = if config.port == 0 { 5432 } else { config.port };

        let mut opts = PgConnectOptions::new()
            .host(&config.host)
            .port(port)
            .database(config.database.as_deref().unwrap_or(DEFAULT_DATABASE))
            .application_name("dorm");

        if !config.username.is_empty() {
            opts = opts.username(&config.username);
        }
        if !config.password.expose().is_empty() {
            opts = opts.password(config.password.expose());
        }

        opts
    }

    /// `host:port/database`, safe for logs
    fn describe_target(config: &ConnectionConfig) -> String {
        format!(
            "{}:{}/{}",
            config.host,
            if config.port == 0 { 5432 } else { config.port },
            config.database.as_deref().unwrap_or(DEFAULT_DATABASE)
        )
    }

    /// Converts a SQLx row to our universal Row type
    fn convert_row(pg_row: &PgRow) -> QRow {
        let values: Vec<Value> = pg_row
            .columns()
            .iter()
            .map(|col| Self::extract_value(pg_row, col.ordinal()))
            .collect();

        QRow { values }
    }

    /// Extracts a value from a PgRow at the given index
    fn extract_value(row: &PgRow, idx: usize) -> Value {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return v.map(Value::Int).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
            return v.map(|i| Value::Int(i as i64)).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            return v.map(Value::Bool).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return v
                .map(|f| {
                    if f.is_finite() {
                        Value::Float(f)
                    } else {
                        Value::Text(f.to_string())
                    }
                })
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
            return v
                .map(|f| Value::Float(f as f64))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Uuid>, _>(idx) {
            return v.map(|u| Value::Text(u.to_string())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(Value::Text).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            return v.map(Value::Bytes).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
            return v.map(Value::Json).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            return v.map(|dt| Value::Text(dt.to_rfc3339())).unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            return v
                .map(|dt| Value::Text(dt.format("%Y-%m-%d %H:%M:%S").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            return v
                .map(|d| Value::Text(d.format("%Y-%m-%d").to_string()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<i64>>, _>(idx) {
            return v
                .map(|vals| Value::Array(vals.into_iter().map(Value::Int).collect()))
                .unwrap_or(Value::Null);
        }
        if let Ok(v) = row.try_get::<Option<Vec<String>>, _>(idx) {
            return v
                .map(|vals| Value::Array(vals.into_iter().map(Value::Text).collect()))
                .unwrap_or(Value::Null);
        }

        Value::Null
    }

    fn get_column_info(row: &PgRow) -> Vec<ColumnInfo> {
        row.columns()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: col.type_info().name().to_string(),
                nullable: true,
            })
            .collect()
    }

    async fn discover_on(conn: &mut PgConnection) -> EngineResult<Vec<TableShape>> {
        let column_rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                c.table_name::text,
                c.column_name::text,
                c.udt_name::text,
                c.is_nullable::text
            FROM information_schema.columns c
            JOIN information_schema.tables t
              ON t.table_schema = c.table_schema
              AND t.table_name = c.table_name
            WHERE c.table_schema = current_schema()
              AND t.table_type = 'BASE TABLE'
            ORDER BY c.table_name, c.ordinal_position
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        let fk_rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT
                tc.table_name::text,
                kcu.column_name::text,
                ccu.table_name::text AS foreign_table_name
            FROM
                information_schema.table_constraints AS tc
                JOIN information_schema.key_column_usage AS kcu
                  ON tc.constraint_name = kcu.constraint_name
                  AND tc.table_schema = kcu.table_schema
                JOIN information_schema.constraint_column_usage AS ccu
                  ON ccu.constraint_name = tc.constraint_name
                  AND ccu.table_schema = tc.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
                AND tc.table_schema = current_schema()
            "#,
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

        let mut shapes: Vec<TableShape> = Vec::new();
        for (table, column, native_type, is_nullable) in column_rows {
            let target = fk_rows
                .iter()
                .find(|(t, c, _)| *t == table && *c == column)
                .map(|(_, _, target)| target.clone());

            let shape = ColumnShape {
                name: column,
                native_type,
                nullable: is_nullable == "YES",
                foreign_key_target: target,
            };

            match shapes.last_mut() {
                Some(last) if last.table_name == table => last.columns.push(shape),
                _ => shapes.push(TableShape {
                    table_name: table,
                    columns: vec![shape],
                }),
            }
        }

        Ok(shapes)
    }

    async fn run(conn: &mut PgConnection, sql: &str) -> EngineResult<QueryResult> {
        let start = Instant::now();

        if returns_rows(sql) {
            let pg_rows: Vec<PgRow> = sqlx::query(sql)
                .fetch_all(&mut *conn)
                .await
                .map_err(map_sqlx_error)?;

            let execution_time_ms = start.elapsed().as_micros() as f64 / 1000.0;
            let columns = pg_rows.first().map(Self::get_column_info).unwrap_or_default();
            let rows: Vec<QRow> = pg_rows.iter().map(Self::convert_row).collect();

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
impl Driver for PostgresDriver {
    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    fn driver_name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn dialect(&self) -> SqlDialect {
        SqlDialect::Postgres
    }

    #[instrument(skip(self), fields(target = %self.target))]
    async fn discover(&self) -> EngineResult<Vec<TableShape>> {
        let mut tx = self.transaction_conn.lock().await;

        // inside an open transaction, discovery sees its uncommitted DDL
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

            debug!(target = %self.target, "Transaction opened");
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
            debug!(target = %self.target, error = %e, "Rollback on close failed");
        }
        self.pool.close().await;
        Ok(())
    }
}

/// Builds [`PostgresDriver`]s
pub struct PostgresFactory;

impl DriverFactory for PostgresFactory {
    fn driver_id(&self) -> &'static str {
        "postgres"
    }

    fn build(&self, config: &ConnectionConfig) -> EngineResult<Arc<dyn Driver>> {
        Ok(Arc::new(PostgresDriver::new(config)?))
    }
}
