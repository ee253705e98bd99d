// SPDX-License-Identifier: Apache-2.0

// Database drivers module

pub mod postgres;
pub mod sqlite;

use crate::engine::error::EngineError;

/// True when `sql` produces a result set rather than an affected-row count.
pub(crate) fn returns_rows(sql: &str) -> bool {
    let trimmed = sql.trim_start().trim_start_matches('(').trim_start();
    let keyword: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" | "VALUES" | "PRAGMA" | "SHOW" | "EXPLAIN" | "TABLE" => true,
        "INSERT" | "UPDATE" | "DELETE" => sql.to_ascii_uppercase().contains(" RETURNING "),
        _ => false,
    }
}

/// True for statements that only read, which run outside any transaction.
pub(crate) fn is_read_only(sql: &str) -> bool {
    if !returns_rows(sql) {
        return false;
    }
    let upper = sql.to_ascii_uppercase();
    let leading = upper.trim_start().trim_start_matches('(').trim_start();
    if leading.starts_with("INSERT") || leading.starts_with("UPDATE") || leading.starts_with("DELETE") {
        return false;
    }
    // data-modifying CTEs
    !(leading.starts_with("WITH")
        && ["INSERT ", "UPDATE ", "DELETE "]
            .iter()
            .any(|kw| upper.contains(kw)))
}

/// Maps a SQLx failure onto the engine taxonomy.
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> EngineError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => EngineError::connection_failed(err.to_string()),
        other => {
            let msg = other.to_string();
            if msg.contains("syntax") {
                EngineError::syntax_error(msg)
            } else {
                EngineError::execution_error(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_row_returning_statements() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("  with t as (select 1) select * from t"));
        assert!(returns_rows("(SELECT 1)"));
        assert!(returns_rows("INSERT INTO t (a) VALUES (1) RETURNING id"));
        assert!(!returns_rows("INSERT INTO t (a) VALUES (1)"));
        assert!(!returns_rows("CREATE TABLE t (a integer)"));
    }

    #[test]
    fn reads_are_told_apart_from_writes() {
        assert!(is_read_only("SELECT \"id\" FROM \"users\" WHERE \"id\" = 1"));
        assert!(is_read_only("with t as (select 1) select * from t"));
        assert!(!is_read_only("WITH t AS (DELETE FROM users RETURNING id) SELECT * FROM t"));
        assert!(!is_read_only("INSERT INTO t (a) VALUES (1) RETURNING id"));
        assert!(!is_read_only("CREATE TABLE t (a integer)"));
    }

    #[test]
    fn pool_exhaustion_is_a_connection_failure() {
        let err = map_sqlx_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, EngineError::ConnectionFailed { .. }));
        assert!(err.is_unreachable());
    }
}
