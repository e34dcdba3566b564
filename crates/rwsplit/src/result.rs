//! Shaping the result of the last statement.

use rwsplit_core::{QueryResult, Row, Value};

use crate::manager::ConnectionKind;

/// The result of one executed statement, tagged with the session that
/// served it.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    inner: QueryResult,
    served_by: ConnectionKind,
}

impl ResultSet {
    pub fn new(inner: QueryResult, served_by: ConnectionKind) -> Self {
        Self { inner, served_by }
    }

    /// Rows in server order; empty for statements without a result set.
    pub fn rows(&self) -> &[Row] {
        &self.inner.rows
    }

    pub fn num_rows(&self) -> usize {
        self.inner.rows.len()
    }

    pub fn affected_rows(&self) -> u64 {
        self.inner.affected_rows
    }

    /// Auto-increment value generated by this statement, 0 if none.
    pub fn insert_id(&self) -> u64 {
        self.inner.last_insert_id
    }

    /// Column names, when the statement produced a result set.
    pub fn columns(&self) -> Option<&[String]> {
        self.inner.columns.as_deref().map(|c| c.names())
    }

    pub fn has_result_set(&self) -> bool {
        self.inner.has_result_set()
    }

    pub fn served_by(&self) -> ConnectionKind {
        self.served_by
    }

    pub fn first_row(&self) -> Option<&Row> {
        self.inner.rows.first()
    }

    /// First column of the first row.
    pub fn first_value(&self) -> Option<&Value> {
        self.first_row().and_then(|row| row.get(0))
    }

    /// Every cell of every row, row-major.
    pub fn flat(&self) -> Vec<Value> {
        self.inner
            .rows
            .iter()
            .flat_map(|row| row.values().cloned())
            .collect()
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.inner.rows
    }

    pub fn into_inner(self) -> QueryResult {
        self.inner
    }
}

/// Outcome of a lookup that can fail, find nothing, or find something.
///
/// A falsy value (`0`, `""`, NULL) is still `Found`; only the absence of a
/// row is `Missing`.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    /// The statement ran and returned no row
    Missing,
    /// The statement failed; see `Driver::error`
    Failed,
}

impl<T> Lookup<T> {
    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Lookup::Missing)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Lookup::Failed)
    }

    /// The found value, dropping the difference between missing and failed.
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(v) => Some(v),
            Lookup::Missing | Lookup::Failed => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::Missing => Lookup::Missing,
            Lookup::Failed => Lookup::Failed,
        }
    }
}

impl<T> From<Option<T>> for Lookup<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Lookup::Missing, Lookup::Found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rwsplit_core::ColumnInfo;
    use std::sync::Arc;

    fn two_rows() -> ResultSet {
        let columns = Arc::new(ColumnInfo::new(vec!["id".to_string(), "name".to_string()]));
        let rows = vec![
            Row::with_columns(Arc::clone(&columns), vec![Value::Int(1), Value::from("a")]),
            Row::with_columns(Arc::clone(&columns), vec![Value::Int(2), Value::Null]),
        ];
        ResultSet::new(QueryResult::with_rows(columns, rows), ConnectionKind::Replica)
    }

    #[test]
    fn test_row_shapes() {
        let set = two_rows();
        assert_eq!(set.num_rows(), 2);
        assert_eq!(set.columns().unwrap(), ["id".to_string(), "name".to_string()]);
        assert_eq!(set.first_value(), Some(&Value::Int(1)));
        assert_eq!(
            set.flat(),
            vec![Value::Int(1), Value::from("a"), Value::Int(2), Value::Null]
        );
        assert_eq!(set.served_by(), ConnectionKind::Replica);
    }

    #[test]
    fn test_command_result() {
        let set = ResultSet::new(QueryResult::command(3, 17), ConnectionKind::Primary);
        assert!(!set.has_result_set());
        assert!(set.columns().is_none());
        assert_eq!(set.affected_rows(), 3);
        assert_eq!(set.insert_id(), 17);
        assert!(set.first_row().is_none());
        assert!(set.flat().is_empty());
    }

    #[test]
    fn test_lookup() {
        let found: Lookup<i32> = Some(0).into();
        assert!(found.is_found());
        assert_eq!(found.map(|v| v + 1).found(), Some(1));

        let missing: Lookup<i32> = None.into();
        assert!(missing.is_missing());
        assert!(Lookup::<i32>::Failed.is_failed());
        assert_eq!(Lookup::<i32>::Failed.found(), None);
    }
}
