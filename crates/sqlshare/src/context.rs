//! Per-handle execution state.
//!
//! A handle creates its [`ExecutionContext`] lazily on the first execute and
//! reuses it afterwards. The context holds at most one pending result: a new
//! statement discards whatever the previous one left unfetched, and a failed
//! statement leaves nothing to fetch.

use sqlshare_core::{ColumnInfo, Error, ResultSet, Result, Row, StorageCore, Value};
use std::sync::Arc;

/// Statement currently owning the context.
#[derive(Debug, Clone)]
pub struct ActiveStatement {
    pub sql: String,
    pub params: usize,
}

#[derive(Debug, Default)]
pub struct ExecutionContext {
    statement: Option<ActiveStatement>,
    pending: Option<ResultSet>,
    executions: u64,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit one statement, replacing the pending result.
    pub fn run(&mut self, storage: &dyn StorageCore, sql: &str, params: &[Value]) -> Result<()> {
        self.discard();
        self.statement = Some(ActiveStatement {
            sql: sql.to_string(),
            params: params.len(),
        });
        self.executions += 1;

        match storage.submit(sql, params) {
            Ok(result) => {
                self.pending = Some(result);
                Ok(())
            }
            Err(e) => {
                self.statement = None;
                Err(e)
            }
        }
    }

    /// Submit the statement once per parameter set; the last run's result stays pending.
    ///
    /// Stops at the first failure, leaving earlier runs applied.
    pub fn run_many<P: AsRef<[Value]>>(
        &mut self,
        storage: &dyn StorageCore,
        sql: &str,
        param_sets: &[P],
    ) -> Result<u64> {
        let mut affected = 0;
        for params in param_sets {
            self.run(storage, sql, params.as_ref())?;
            affected += self.pending.as_ref().map_or(0, ResultSet::rows_affected);
        }
        Ok(affected)
    }

    fn discard(&mut self) {
        let undrained = self.pending.take().filter(|rs| !rs.is_exhausted());
        if let Some(previous) = undrained {
            tracing::trace!(
                unfetched = previous.remaining(),
                sql = self.statement.as_ref().map(|s| s.sql.as_str()),
                "Discarding undrained result"
            );
        }
        self.statement = None;
    }

    fn pending(&mut self) -> Result<&mut ResultSet> {
        self.pending.as_mut().ok_or(Error::NoActiveResult)
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
        Ok(self.pending()?.drain())
    }

    pub fn fetch_one(&mut self) -> Result<Option<Row>> {
        Ok(self.pending()?.next_row())
    }

    pub fn fetch_many(&mut self, n: usize) -> Result<Vec<Row>> {
        Ok(self.pending()?.take(n))
    }

    pub fn description(&mut self) -> Result<Arc<ColumnInfo>> {
        Ok(Arc::clone(self.pending()?.columns()))
    }

    pub fn rowcount(&mut self) -> Result<u64> {
        Ok(self.pending()?.rows_affected())
    }

    pub fn statement(&self) -> Option<&ActiveStatement> {
        self.statement.as_ref()
    }

    /// Statements submitted through this context, successful or not.
    pub fn executions(&self) -> u64 {
        self.executions
    }
}

/// The context a fetch reads from; a handle that never executed has nothing to fetch.
pub(crate) fn require(slot: &mut Option<ExecutionContext>) -> Result<&mut ExecutionContext> {
    slot.as_mut().ok_or(Error::NoActiveResult)
}
