// SPDX-License-Identifier: Apache-2.0

//! Universal data types shared by drivers, nodes and federated queries
//!
//! These types give one normalized representation of rows, values and table
//! shapes across every backend kind.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::observability::Sensitive;
use crate::schema::FieldKind;

/// Namespace for deriving node ids from locator handles.
const NODE_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d2f_4c1e_9a57_4b8e_b3d0_2e61_f0c4_a9d7);

/// Stable identifier of a node
///
/// Derived deterministically from the opaque handle a locator reports, so the
/// same endpoint maps to the same id across rediscoveries and processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    pub fn from_handle(handle: &str) -> Self {
        Self(Uuid::new_v5(&NODE_ID_NAMESPACE, handle.as_bytes()))
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backend kind of a node (open set)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BackendKind {
    Postgres,
    Sqlite,
    Other(String),
}

impl BackendKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::Other(name) => name,
        }
    }

    /// Default port for the backend, `0` when it has none.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Sqlite | Self::Other(_) => 0,
        }
    }
}

impl From<&str> for BackendKind {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Self::Postgres,
            "sqlite" | "sqlite3" => Self::Sqlite,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for BackendKind {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<BackendKind> for String {
    fn from(value: BackendKind) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters a driver factory needs to bind one backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub driver: BackendKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Sensitive<String>,
    /// Backend-specific database name (file path for SQLite)
    pub database: Option<String>,
    pub pool_max_connections: Option<u32>,
    pub pool_acquire_timeout_secs: Option<u32>,
}

/// Universal value representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Column metadata of a result set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// A single row of data (indexed by column order)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub values: Vec<Value>,
}

/// Statement execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    /// Number of affected rows (for INSERT/UPDATE/DELETE)
    pub affected_rows: Option<u64>,
    pub execution_time_ms: f64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: None,
            execution_time_ms: 0.0,
        }
    }

    pub fn with_affected_rows(affected: u64, time_ms: f64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: Some(affected),
            execution_time_ms: time_ms,
        }
    }

    /// Consumes the result into one column-name keyed map per row.
    pub fn into_named_rows(self) -> Vec<BTreeMap<String, Value>> {
        let names: Vec<String> = self.columns.into_iter().map(|c| c.name).collect();
        self.rows
            .into_iter()
            .map(|row| names.iter().cloned().zip(row.values).collect())
            .collect()
    }
}

/// Raw column descriptor as reported by a driver's discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnShape {
    pub name: String,
    pub native_type: String,
    pub nullable: bool,
    /// Raw name of the table this column references, if it is a foreign key
    pub foreign_key_target: Option<String>,
}

impl ColumnShape {
    pub fn new(name: impl Into<String>, native_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
            nullable: true,
            foreign_key_target: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn references(mut self, table: impl Into<String>) -> Self {
        self.foreign_key_target = Some(table.into());
        self
    }
}

/// Raw table descriptor as reported by a driver's discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableShape {
    pub table_name: String,
    pub columns: Vec<ColumnShape>,
}

impl TableShape {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnShape) -> Self {
        self.columns.push(column);
        self
    }

    /// Describes why `existing` cannot stand in for `self`, if it cannot.
    ///
    /// Columns are compared by name and by field kind of their type tag, so
    /// `int4` and `integer` agree while `text` and `integer` do not.
    pub fn incompatibility_with(&self, existing: &TableShape) -> Option<String> {
        if self.columns.len() != existing.columns.len() {
            return Some(format!(
                "existing table has {} columns, requested {}",
                existing.columns.len(),
                self.columns.len()
            ));
        }

        for wanted in &self.columns {
            let Some(found) = existing
                .columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(&wanted.name))
            else {
                return Some(format!("existing table lacks column '{}'", wanted.name));
            };

            let wanted_kind = FieldKind::classify(&wanted.native_type);
            let found_kind = FieldKind::classify(&found.native_type);
            if wanted_kind != found_kind {
                return Some(format!(
                    "column '{}' is {} ({}), requested {} ({})",
                    wanted.name, found_kind, found.native_type, wanted_kind, wanted.native_type
                ));
            }
        }

        None
    }
}

/// Filter operator for WHERE clauses
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    #[default]
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    IsNull,
    IsNotNull,
}

/// Column filter for WHERE clauses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl ColumnFilter {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(column, FilterOperator::Eq, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_deterministic_per_handle() {
        assert_eq!(NodeId::from_handle("c0ffee"), NodeId::from_handle("c0ffee"));
        assert_ne!(NodeId::from_handle("c0ffee"), NodeId::from_handle("decaf"));
        assert_eq!(NodeId::from_handle("c0ffee").short().len(), 8);
    }

    #[test]
    fn backend_kind_round_trips_through_strings() {
        assert_eq!(BackendKind::from("PostgreSQL"), BackendKind::Postgres);
        assert_eq!(BackendKind::from("sqlite3"), BackendKind::Sqlite);
        assert_eq!(
            BackendKind::from("cockroach"),
            BackendKind::Other("cockroach".to_string())
        );

        let json = serde_json::to_string(&BackendKind::Postgres).unwrap();
        assert_eq!(json, "\"postgres\"");
    }

    #[test]
    fn named_rows_zip_columns_with_values() {
        let result = QueryResult {
            columns: vec![
                ColumnInfo {
                    name: "id".to_string(),
                    data_type: "int".to_string(),
                    nullable: false,
                },
                ColumnInfo {
                    name: "name".to_string(),
                    data_type: "text".to_string(),
                    nullable: true,
                },
            ],
            rows: vec![Row {
                values: vec![Value::Int(7), Value::Text("ada".to_string())],
            }],
            affected_rows: None,
            execution_time_ms: 0.0,
        };

        let rows = result.into_named_rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::Int(7));
        assert_eq!(rows[0]["name"], Value::Text("ada".to_string()));
    }

    #[test]
    fn shape_compatibility_compares_kinds() {
        let wanted = TableShape::new("users")
            .column(ColumnShape::new("id", "integer"))
            .column(ColumnShape::new("name", "text"));
        let same = TableShape::new("users")
            .column(ColumnShape::new("id", "int4"))
            .column(ColumnShape::new("name", "character varying"));
        let different = TableShape::new("users")
            .column(ColumnShape::new("id", "integer"))
            .column(ColumnShape::new("name", "boolean"));

        assert!(wanted.incompatibility_with(&same).is_none());
        let reason = wanted.incompatibility_with(&different).unwrap();
        assert!(reason.contains("name"));
    }
}
