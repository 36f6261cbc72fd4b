//! Materialized statement results.

use crate::row::{ColumnInfo, Row};
use std::collections::VecDeque;
use std::sync::Arc;

/// The rows produced by one statement, drained front to back by fetches.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Arc<ColumnInfo>,
    rows: VecDeque<Row>,
    rows_affected: u64,
}

impl ResultSet {
    /// Create a result set from rows sharing `columns`.
    pub fn new(columns: Arc<ColumnInfo>, rows: Vec<Row>, rows_affected: u64) -> Self {
        Self {
            columns,
            rows: rows.into(),
            rows_affected,
        }
    }

    /// A result with no columns and no rows, as produced by DDL.
    pub fn empty(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    pub fn columns(&self) -> &Arc<ColumnInfo> {
        &self.columns
    }

    /// Rows changed by the submission (0 for queries).
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Rows not yet fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn next_row(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    /// Take up to `n` rows from the front.
    pub fn take(&mut self, n: usize) -> Vec<Row> {
        let n = n.min(self.rows.len());
        self.rows.drain(..n).collect()
    }

    /// Take every remaining row.
    pub fn drain(&mut self) -> Vec<Row> {
        self.rows.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;

    fn numbers(n: i32) -> ResultSet {
        let columns = Arc::new(ColumnInfo::new(vec!["n".to_string()]));
        let rows = (0..n)
            .map(|i| Row::with_columns(Arc::clone(&columns), vec![Value::Int(i)]))
            .collect();
        ResultSet::new(columns, rows, 0)
    }

    #[test]
    fn test_incremental_draining() {
        let mut rs = numbers(5);
        assert_eq!(rs.remaining(), 5);
        assert_eq!(rs.next_row().unwrap().get(0), Some(&Value::Int(0)));
        let two = rs.take(2);
        assert_eq!(two.len(), 2);
        assert_eq!(two[1].get(0), Some(&Value::Int(2)));
        let rest = rs.drain();
        assert_eq!(rest.len(), 2);
        assert!(rs.is_exhausted());
        assert!(rs.drain().is_empty());
    }

    #[test]
    fn test_take_more_than_available() {
        let mut rs = numbers(2);
        assert_eq!(rs.take(10).len(), 2);
        assert!(rs.next_row().is_none());
    }

    #[test]
    fn test_empty_result_keeps_rows_affected() {
        let rs = ResultSet::empty(3);
        assert_eq!(rs.rows_affected(), 3);
        assert!(rs.columns().is_empty());
        assert!(rs.is_exhausted());
    }
}
