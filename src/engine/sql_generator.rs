// SPDX-License-Identifier: Apache-2.0

//! SQL Generator
//!
//! Generates dialect-specific `CREATE TABLE`, multi-row `INSERT` and
//! filtered `SELECT` statements for nodes.

use std::collections::BTreeMap;

use crate::engine::error::{EngineError, EngineResult};
use crate::engine::types::{BackendKind, ColumnFilter, FilterOperator, TableShape, Value};

/// SQL dialect for different backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    Sqlite,
}

impl SqlDialect {
    pub fn from_backend(backend: &BackendKind) -> Option<Self> {
        match backend {
            BackendKind::Postgres => Some(SqlDialect::Postgres),
            BackendKind::Sqlite => Some(SqlDialect::Sqlite),
            BackendKind::Other(_) => None,
        }
    }

    /// Quote an identifier according to the dialect
    pub fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Format a value as a SQL literal
    pub fn format_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => match self {
                SqlDialect::Postgres => if *b { "TRUE" } else { "FALSE" }.to_string(),
                SqlDialect::Sqlite => if *b { "1" } else { "0" }.to_string(),
            },
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    "'NaN'".to_string()
                } else if f.is_infinite() {
                    if *f > 0.0 { "'Infinity'" } else { "'-Infinity'" }.to_string()
                } else {
                    format!("{}", f)
                }
            }
            Value::Text(s) => self.escape_string(s),
            Value::Bytes(b) => self.format_bytes(b),
            Value::Json(j) => {
                let json_str = serde_json::to_string(j).unwrap_or_else(|_| "null".to_string());
                self.escape_string(&json_str)
            }
            Value::Array(arr) => match self {
                SqlDialect::Postgres => {
                    let elements: Vec<String> = arr.iter().map(|v| self.format_value(v)).collect();
                    format!("ARRAY[{}]", elements.join(", "))
                }
                SqlDialect::Sqlite => {
                    // stored as JSON text
                    let json = serde_json::to_string(arr).unwrap_or_else(|_| "[]".to_string());
                    self.escape_string(&json)
                }
            },
        }
    }

    fn escape_string(&self, s: &str) -> String {
        match self {
            SqlDialect::Postgres => {
                let mut escaped = String::with_capacity(s.len());
                let mut needs_e_prefix = false;

                for ch in s.chars() {
                    match ch {
                        '\\' => {
                            needs_e_prefix = true;
                            escaped.push_str("\\\\");
                        }
                        '\'' => escaped.push_str("''"),
                        '\n' => {
                            needs_e_prefix = true;
                            escaped.push_str("\\n");
                        }
                        '\r' => {
                            needs_e_prefix = true;
                            escaped.push_str("\\r");
                        }
                        '\t' => {
                            needs_e_prefix = true;
                            escaped.push_str("\\t");
                        }
                        _ => escaped.push(ch),
                    }
                }

                if needs_e_prefix {
                    format!("E'{}'", escaped)
                } else {
                    format!("'{}'", escaped)
                }
            }
            SqlDialect::Sqlite => format!("'{}'", s.replace('\'', "''")),
        }
    }

    fn format_bytes(&self, bytes: &[u8]) -> String {
        let hex_string: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        match self {
            SqlDialect::Postgres => format!("'\\x{}'", hex_string),
            SqlDialect::Sqlite => format!("X'{}'", hex_string),
        }
    }
}

/// Generate a CREATE TABLE statement, foreign keys included as `REFERENCES`
pub fn generate_create_table(dialect: SqlDialect, shape: &TableShape) -> EngineResult<String> {
    if shape.columns.is_empty() {
        return Err(EngineError::validation(format!(
            "Cannot create table '{}' without columns",
            shape.table_name
        )));
    }

    let columns: Vec<String> = shape
        .columns
        .iter()
        .map(|column| {
            let native_type = if column.native_type.trim().is_empty() {
                "text"
            } else {
                column.native_type.trim()
            };

            let mut def = format!("{} {}", dialect.quote_ident(&column.name), native_type);
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(target) = &column.foreign_key_target {
                def.push_str(&format!(" REFERENCES {}", dialect.quote_ident(target)));
            }
            def
        })
        .collect();

    Ok(format!(
        "CREATE TABLE {} ({})",
        dialect.quote_ident(&shape.table_name),
        columns.join(", ")
    ))
}

/// Generate one multi-row INSERT statement
///
/// Every row must carry a value for every listed column; missing entries are
/// written as NULL.
pub fn generate_insert_batch(
    dialect: SqlDialect,
    table_name: &str,
    columns: &[String],
    rows: &[&BTreeMap<String, Value>],
) -> EngineResult<String> {
    if columns.is_empty() {
        return Err(EngineError::validation(format!(
            "Cannot insert into '{}' without columns",
            table_name
        )));
    }
    if rows.is_empty() {
        return Err(EngineError::validation(format!(
            "Cannot insert into '{}' without rows",
            table_name
        )));
    }

    let column_list: Vec<String> = columns.iter().map(|c| dialect.quote_ident(c)).collect();
    let tuples: Vec<String> = rows
        .iter()
        .map(|row| {
            let values: Vec<String> = columns
                .iter()
                .map(|c| dialect.format_value(row.get(c).unwrap_or(&Value::Null)))
                .collect();
            format!("({})", values.join(", "))
        })
        .collect();

    Ok(format!(
        "INSERT INTO {} ({}) VALUES {}",
        dialect.quote_ident(table_name),
        column_list.join(", "),
        tuples.join(", ")
    ))
}

/// Generate a SELECT statement
///
/// An empty `columns` slice selects every column.
pub fn generate_select(
    dialect: SqlDialect,
    table_name: &str,
    columns: &[String],
    filters: &[ColumnFilter],
    limit: Option<u64>,
) -> String {
    let projection = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|c| dialect.quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", projection, dialect.quote_ident(table_name));

    if !filters.is_empty() {
        let clauses: Vec<String> = filters.iter().map(|f| format_filter(dialect, f)).collect();
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }

    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    sql
}

fn format_filter(dialect: SqlDialect, filter: &ColumnFilter) -> String {
    let column = dialect.quote_ident(&filter.column);

    // `= NULL` never matches
    if filter.value.is_null() {
        match filter.operator {
            FilterOperator::Eq | FilterOperator::IsNull => return format!("{} IS NULL", column),
            FilterOperator::Neq | FilterOperator::IsNotNull => {
                return format!("{} IS NOT NULL", column)
            }
            _ => {}
        }
    }

    let op = match filter.operator {
        FilterOperator::Eq => "=",
        FilterOperator::Neq => "<>",
        FilterOperator::Gt => ">",
        FilterOperator::Gte => ">=",
        FilterOperator::Lt => "<",
        FilterOperator::Lte => "<=",
        FilterOperator::Like => "LIKE",
        FilterOperator::IsNull => return format!("{} IS NULL", column),
        FilterOperator::IsNotNull => return format!("{} IS NOT NULL", column),
    };

    format!("{} {} {}", column, op, dialect.format_value(&filter.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::ColumnShape;

    #[test]
    fn test_quote_ident() {
        let dialect = SqlDialect::Postgres;
        assert_eq!(dialect.quote_ident("users"), "\"users\"");
        assert_eq!(dialect.quote_ident("user\"name"), "\"user\"\"name\"");
    }

    #[test]
    fn test_format_value_string() {
        let dialect = SqlDialect::Postgres;
        assert_eq!(dialect.format_value(&Value::Text("hello".to_string())), "'hello'");
        assert_eq!(dialect.format_value(&Value::Text("it's".to_string())), "'it''s'");
        assert_eq!(dialect.format_value(&Value::Text("a\nb".to_string())), "E'a\\nb'");
    }

    #[test]
    fn test_format_value_per_dialect() {
        assert_eq!(SqlDialect::Postgres.format_value(&Value::Bool(true)), "TRUE");
        assert_eq!(SqlDialect::Sqlite.format_value(&Value::Bool(true)), "1");
        assert_eq!(SqlDialect::Sqlite.format_value(&Value::Bytes(vec![0xab, 0x01])), "X'ab01'");
        assert_eq!(SqlDialect::Sqlite.format_value(&Value::Null), "NULL");
    }

    #[test]
    fn test_generate_create_table() {
        let shape = TableShape::new("orders")
            .column(ColumnShape::new("id", "integer").not_null())
            .column(ColumnShape::new("user_id", "integer").references("users"))
            .column(ColumnShape::new("note", ""));

        let sql = generate_create_table(SqlDialect::Sqlite, &shape).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"orders\" (\"id\" integer NOT NULL, \
             \"user_id\" integer REFERENCES \"users\", \"note\" text)"
        );
    }

    #[test]
    fn test_generate_create_table_rejects_empty() {
        let err = generate_create_table(SqlDialect::Postgres, &TableShape::new("empty"));
        assert!(matches!(err, Err(EngineError::ValidationError { .. })));
    }

    #[test]
    fn test_generate_insert_batch() {
        let mut first = BTreeMap::new();
        first.insert("id".to_string(), Value::Int(1));
        first.insert("name".to_string(), Value::Text("ada".to_string()));
        let mut second = BTreeMap::new();
        second.insert("id".to_string(), Value::Int(2));
        second.insert("name".to_string(), Value::Null);

        let columns = vec!["id".to_string(), "name".to_string()];
        let sql =
            generate_insert_batch(SqlDialect::Postgres, "users", &columns, &[&first, &second])
                .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"id\", \"name\") VALUES (1, 'ada'), (2, NULL)"
        );
    }

    #[test]
    fn test_generate_select() {
        let sql = generate_select(SqlDialect::Postgres, "users", &[], &[], None);
        assert_eq!(sql, "SELECT * FROM \"users\"");

        let sql = generate_select(
            SqlDialect::Sqlite,
            "users",
            &["id".to_string(), "name".to_string()],
            &[
                ColumnFilter::eq("name", "ada"),
                ColumnFilter::new("id", FilterOperator::Gt, 3),
                ColumnFilter::eq("deleted_at", Value::Null),
            ],
            Some(10),
        );
        assert_eq!(
            sql,
            "SELECT \"id\", \"name\" FROM \"users\" WHERE \"name\" = 'ada' AND \"id\" > 3 \
             AND \"deleted_at\" IS NULL LIMIT 10"
        );
    }
}
