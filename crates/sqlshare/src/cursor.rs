//! Execution handles derived from a connection.

use crate::connection::ConnectionShared;
use crate::context::{self, ExecutionContext};
use crate::handle::HandleCore;
use sqlshare_core::{ColumnInfo, HandleKind, Result, Row, Value};
use std::sync::{Arc, Weak};

pub(crate) struct CursorShared {
    id: u64,
    connection: Arc<ConnectionShared>,
    core: HandleCore,
}

impl std::fmt::Debug for CursorShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorShared")
            .field("id", &self.id)
            .field("connection", &self.connection.id())
            .field("core", &self.core)
            .finish()
    }
}

impl CursorShared {
    /// Close on behalf of `by`. Returns false if already closed.
    pub(crate) fn invalidate(&self, by: HandleKind) -> bool {
        self.core.teardown(by)
    }

    /// Run `f` on the context slot while both this cursor and its connection are open.
    fn with_slot<T>(&self, f: impl FnOnce(&mut Option<ExecutionContext>) -> Result<T>) -> Result<T> {
        self.core.with_slot(|slot| {
            self.connection.ensure_open()?;
            f(slot)
        })
    }

    fn with_result<T>(&self, f: impl FnOnce(&mut ExecutionContext) -> Result<T>) -> Result<T> {
        self.with_slot(|slot| f(context::require(slot)?))
    }
}

impl Drop for CursorShared {
    fn drop(&mut self) {
        self.connection.forget_cursor(self.id);
    }
}

/// An execution handle sharing its connection's dataset.
///
/// Each cursor has its own execution context and result buffer, so cursors
/// used from different threads never wait on each other except at the
/// dataset itself. Clones are the same cursor.
///
/// Created with [`Connection::cursor`](crate::Connection::cursor).
#[derive(Debug, Clone)]
pub struct Cursor {
    shared: Arc<CursorShared>,
}

impl Cursor {
    pub(crate) fn new(id: u64, connection: Arc<ConnectionShared>) -> Self {
        let core = HandleCore::new(HandleKind::Cursor, connection.mode());
        Self {
            shared: Arc::new(CursorShared {
                id,
                connection,
                core,
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<CursorShared> {
        Arc::downgrade(&self.shared)
    }

    /// Identifier, unique among the cursors of one connection.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Execute `sql` on this cursor, discarding any undrained previous result.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<&Self> {
        let storage = self.shared.connection.storage();
        self.shared.with_slot(|slot| {
            slot.get_or_insert_with(ExecutionContext::new)
                .run(storage, sql, params)
        })?;
        Ok(self)
    }

    /// Execute `sql` once per parameter set and return the total rows changed.
    pub fn executemany<P: AsRef<[Value]>>(&self, sql: &str, param_sets: &[P]) -> Result<u64> {
        let storage = self.shared.connection.storage();
        self.shared.with_slot(|slot| {
            slot.get_or_insert_with(ExecutionContext::new)
                .run_many(storage, sql, param_sets)
        })
    }

    pub fn fetchall(&self) -> Result<Vec<Row>> {
        self.shared.with_result(ExecutionContext::fetch_all)
    }

    pub fn fetchone(&self) -> Result<Option<Row>> {
        self.shared.with_result(ExecutionContext::fetch_one)
    }

    pub fn fetchmany(&self, n: usize) -> Result<Vec<Row>> {
        self.shared.with_result(|ctx| ctx.fetch_many(n))
    }

    pub fn description(&self) -> Result<Arc<ColumnInfo>> {
        self.shared.with_result(ExecutionContext::description)
    }

    pub fn rowcount(&self) -> Result<u64> {
        self.shared.with_result(ExecutionContext::rowcount)
    }

    /// Close this cursor. The connection and its other cursors are unaffected.
    pub fn close(&self) -> Result<()> {
        let shared = &self.shared;
        shared.core.guard().check()?;
        if shared.invalidate(HandleKind::Cursor) {
            shared.connection.forget_cursor(shared.id);
        }
        Ok(())
    }

    /// Let any thread use this cursor.
    pub fn release_thread(&self) -> Result<()> {
        self.shared.with_slot(|_| Ok(()))?;
        self.shared.core.guard().release()
    }

    /// Bind this cursor to the calling thread.
    pub fn bind_to_current_thread(&self) -> Result<()> {
        self.shared.with_slot(|_| Ok(()))?;
        self.shared.core.guard().bind_to_current()
    }

    /// Whether this cursor or its connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.core.is_closed() || self.shared.connection.is_closed()
    }
}
