//! The SQL client capability the routing engine is written against.
//!
//! The engine never speaks a wire protocol itself. Anything that can open a
//! session, escape a string for its dialect, run a statement and report the
//! usual counters can stand in for a server connection: the MySQL driver in
//! `rwsplit-mysql` in production, scripted in-memory clients in tests.

use std::sync::Arc;

use crate::error::Result;
use crate::row::{ColumnInfo, Row};

/// The outcome of one statement on one connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column metadata; `None` when the statement produced no result set
    pub columns: Option<Arc<ColumnInfo>>,
    /// Rows in server order (empty for statements without a result set)
    pub rows: Vec<Row>,
    /// Rows changed by the statement
    pub affected_rows: u64,
    /// Auto-increment value generated by the statement, 0 if none
    pub last_insert_id: u64,
}

impl QueryResult {
    /// Result of a statement that returns rows.
    pub fn with_rows(columns: Arc<ColumnInfo>, rows: Vec<Row>) -> Self {
        Self {
            columns: Some(columns),
            rows,
            affected_rows: 0,
            last_insert_id: 0,
        }
    }

    /// Result of a statement that only reports counters.
    pub fn command(affected_rows: u64, last_insert_id: u64) -> Self {
        Self {
            columns: None,
            rows: Vec::new(),
            affected_rows,
            last_insert_id,
        }
    }

    /// Did the statement produce a result set (even an empty one)?
    pub fn has_result_set(&self) -> bool {
        self.columns.is_some()
    }
}

/// One open session with one SQL server.
///
/// All calls block until the server answers. Implementations are owned by a
/// single driver and never shared between threads.
pub trait SqlClient: Send {
    /// Send a complete statement and collect its result.
    fn query(&mut self, sql: &str) -> Result<QueryResult>;

    /// Escape `raw` so it can be placed inside a quoted literal for this
    /// connection's dialect and character set. Quotes are not added.
    fn escape_string(&self, raw: &str) -> String;

    /// Switch the session character set.
    fn set_charset(&mut self, charset: &str) -> Result<()>;

    /// Toggle implicit commit after each statement.
    fn set_autocommit(&mut self, enabled: bool) -> Result<()>;

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<()>;

    /// Rows changed by the last statement on this connection.
    fn affected_rows(&self) -> u64;

    /// Auto-increment value generated by the last statement on this connection.
    fn last_insert_id(&self) -> u64;

    /// Human-readable server status line.
    fn stat(&mut self) -> Result<String>;

    /// Server version as `major * 10000 + minor * 100 + patch`.
    fn server_version(&self) -> u32;

    /// End the session. Closing twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    #[test]
    fn test_query_result_shapes() {
        let cmd = QueryResult::command(3, 0);
        assert!(!cmd.has_result_set());
        assert_eq!(cmd.affected_rows, 3);

        let columns = Arc::new(ColumnInfo::new(vec!["a".to_string()]));
        let rows = vec![Row::with_columns(Arc::clone(&columns), vec![Value::Int(1)])];
        let set = QueryResult::with_rows(columns, rows);
        assert!(set.has_result_set());
        assert_eq!(set.rows.len(), 1);

        let empty = QueryResult::with_rows(Arc::new(ColumnInfo::new(vec![])), vec![]);
        assert!(empty.has_result_set());
    }
}
