//! State shared by connections and cursors: guard, context slot, closed flag.

use crate::context::{self, ExecutionContext};
use crate::guard::{ThreadGuard, ThreadMode};
use sqlshare_core::{Error, HandleKind, Result, StorageCore, Value};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Admission and execution plumbing for one handle.
///
/// Calls go through the guard, then the closed flag, then the context lock.
/// The closed flag is re-read once the lock is held so a concurrent close
/// always wins over a call that has not started executing.
#[derive(Debug)]
pub(crate) struct HandleCore {
    kind: HandleKind,
    guard: ThreadGuard,
    context: Mutex<Option<ExecutionContext>>,
    /// Which handle's close invalidated this one.
    closed_by: OnceLock<HandleKind>,
}

impl HandleCore {
    pub(crate) fn new(kind: HandleKind, mode: ThreadMode) -> Self {
        Self {
            kind,
            guard: ThreadGuard::new(kind, mode),
            context: Mutex::new(None),
            closed_by: OnceLock::new(),
        }
    }

    pub(crate) fn guard(&self) -> &ThreadGuard {
        &self.guard
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed_by.get().is_some()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        match self.closed_by.get() {
            Some(by) => Err(Error::closed(*by)),
            None => Ok(()),
        }
    }

    /// Guard check, then closed check. Takes no lock on the context.
    pub(crate) fn admit(&self) -> Result<()> {
        self.guard.check()?;
        self.ensure_open()
    }

    fn lock(&self) -> MutexGuard<'_, Option<ExecutionContext>> {
        self.context.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the context slot of an admitted, still-open handle.
    pub(crate) fn with_slot<T>(
        &self,
        f: impl FnOnce(&mut Option<ExecutionContext>) -> Result<T>,
    ) -> Result<T> {
        self.admit()?;
        let mut slot = self.lock();
        self.ensure_open()?;
        f(&mut slot)
    }

    /// Run `f` on the context, creating it on first use.
    pub(crate) fn with_context<T>(
        &self,
        f: impl FnOnce(&mut ExecutionContext) -> Result<T>,
    ) -> Result<T> {
        self.with_slot(|slot| f(slot.get_or_insert_with(ExecutionContext::new)))
    }

    /// Run `f` on an existing context; a handle that never executed has nothing to read.
    pub(crate) fn with_result<T>(
        &self,
        f: impl FnOnce(&mut ExecutionContext) -> Result<T>,
    ) -> Result<T> {
        self.with_slot(|slot| f(context::require(slot)?))
    }

    pub(crate) fn execute(
        &self,
        storage: &dyn StorageCore,
        sql: &str,
        params: &[Value],
    ) -> Result<()> {
        self.with_context(|ctx| ctx.run(storage, sql, params))
    }

    pub(crate) fn execute_many<P: AsRef<[Value]>>(
        &self,
        storage: &dyn StorageCore,
        sql: &str,
        param_sets: &[P],
    ) -> Result<u64> {
        self.with_context(|ctx| ctx.run_many(storage, sql, param_sets))
    }

    /// Mark the handle closed, wait for any in-flight statement and drop the context.
    ///
    /// Returns false if the handle was already closed.
    pub(crate) fn teardown(&self, by: HandleKind) -> bool {
        if self.closed_by.set(by).is_err() {
            return false;
        }
        let released = self.lock().take();
        let last = released.as_ref().and_then(ExecutionContext::statement);
        tracing::debug!(
            handle = %self.kind,
            closed_by = %by,
            executions = released.as_ref().map_or(0, ExecutionContext::executions),
            last_sql = last.map(|s| s.sql.as_str()),
            last_params = last.map(|s| s.params),
            "Tore down execution context"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlshare_sqlite::SqliteStorage;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fetch_without_execute() {
        let core = HandleCore::new(HandleKind::Cursor, ThreadMode::Strict);
        assert!(matches!(
            core.with_result(ExecutionContext::fetch_all),
            Err(Error::NoActiveResult)
        ));
    }

    #[test]
    fn test_closed_reports_closing_handle() {
        let core = HandleCore::new(HandleKind::Cursor, ThreadMode::Strict);
        assert!(core.teardown(HandleKind::Connection));
        assert!(!core.teardown(HandleKind::Cursor));
        match core.admit() {
            Err(Error::Closed(e)) => assert_eq!(e.handle, HandleKind::Connection),
            other => panic!("expected closed error, got {other:?}"),
        }
    }

    #[test]
    fn test_guard_checked_before_closed() {
        let core = Arc::new(HandleCore::new(HandleKind::Connection, ThreadMode::Strict));
        core.teardown(HandleKind::Connection);
        let remote = Arc::clone(&core);
        let result = thread::spawn(move || remote.admit()).join().unwrap();
        assert!(matches!(result, Err(Error::CrossThread(_))));
    }

    #[test]
    fn test_teardown_drops_pending_result() {
        let storage = SqliteStorage::open_memory().unwrap();
        let core = HandleCore::new(HandleKind::Cursor, ThreadMode::Relaxed);
        core.execute(&storage, "SELECT 1", &[]).unwrap();
        core.teardown(HandleKind::Cursor);
        assert!(core.is_closed());
        assert!(matches!(
            core.execute(&storage, "SELECT 1", &[]),
            Err(Error::Closed(_))
        ));
    }
}
