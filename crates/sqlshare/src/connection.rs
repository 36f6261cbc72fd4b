//! The root handle to one logical dataset.

use crate::config::{ConnectionConfig, Target};
use crate::context::ExecutionContext;
use crate::cursor::{Cursor, CursorShared};
use crate::guard::ThreadMode;
use crate::handle::HandleCore;
use sqlshare_core::{ColumnInfo, HandleKind, Result, Row, StorageCore, Value};
use sqlshare_sqlite::SqliteStorage;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Live cursors of a connection, by id.
#[derive(Debug, Default)]
pub(crate) struct CursorTable {
    next_id: u64,
    live: HashMap<u64, Weak<CursorShared>>,
}

/// State every clone of a [`Connection`] and every derived [`Cursor`] points to.
pub(crate) struct ConnectionShared {
    id: u64,
    config: ConnectionConfig,
    storage: Arc<dyn StorageCore>,
    core: HandleCore,
    cursors: Mutex<CursorTable>,
}

impl std::fmt::Debug for ConnectionShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionShared")
            .field("id", &self.id)
            .field("target", &self.config.target)
            .field("storage", &self.storage.describe())
            .field("closed", &self.core.is_closed())
            .finish_non_exhaustive()
    }
}

impl ConnectionShared {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn storage(&self) -> &dyn StorageCore {
        self.storage.as_ref()
    }

    pub(crate) fn mode(&self) -> ThreadMode {
        self.core.guard().mode()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        self.core.ensure_open()
    }

    fn table(&self) -> MutexGuard<'_, CursorTable> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn forget_cursor(&self, id: u64) {
        self.table().live.remove(&id);
    }
}

/// A connection to one dataset.
///
/// `Connection` is a cheap handle: clones share the same guard, execution
/// context and cursor table, and any clone can close the connection for all.
/// Cursors derived from it keep the dataset alive but never keep the
/// connection open.
///
/// ```
/// use sqlshare::Connection;
///
/// let conn = Connection::open_memory().unwrap();
/// conn.execute("CREATE TABLE t (v INTEGER)", &[]).unwrap();
/// let rows = conn
///     .execute("SELECT 1 + 1", &[])
///     .unwrap()
///     .fetchall()
///     .unwrap();
/// assert_eq!(rows[0].get_as::<i64>(0).unwrap(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

impl Connection {
    /// Open a connection to `target` with `config`'s remaining settings.
    pub fn open(target: impl Into<Target>, config: ConnectionConfig) -> Result<Self> {
        Self::open_with_config(config.target(target))
    }

    /// Open a private in-memory dataset with default settings.
    pub fn open_memory() -> Result<Self> {
        Self::open_with_config(ConnectionConfig::memory())
    }

    /// Open a durable dataset at `path` with default settings.
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_config(ConnectionConfig::new(path.as_ref()))
    }

    /// Open a connection described entirely by `config`.
    #[tracing::instrument(level = "debug", skip(config), fields(target = %config.target))]
    pub fn open_with_config(config: ConnectionConfig) -> Result<Self> {
        let storage = SqliteStorage::open(&config.to_sqlite_config()?)?;
        Ok(Self::with_storage(storage.into_shared(), config))
    }

    /// Build a connection over an already opened storage core.
    pub fn with_storage(storage: Arc<dyn StorageCore>, config: ConnectionConfig) -> Self {
        let mode = ThreadMode::from_allow_cross_thread(config.allow_cross_thread_access);
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            connection = id,
            storage = %storage.describe(),
            ?mode,
            "Connection opened"
        );
        Self {
            shared: Arc::new(ConnectionShared {
                id,
                config,
                storage,
                core: HandleCore::new(HandleKind::Connection, mode),
                cursors: Mutex::new(CursorTable::default()),
            }),
        }
    }

    /// Execute `sql` on the connection's own context.
    ///
    /// Any undrained result of the previous statement is discarded. Read the
    /// new result with the fetch methods.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<&Self> {
        let shared = &self.shared;
        shared.core.execute(shared.storage(), sql, params)?;
        Ok(self)
    }

    /// Execute `sql` once per parameter set and return the total rows changed.
    ///
    /// Stops at the first failing set; earlier sets stay applied.
    pub fn executemany<P: AsRef<[Value]>>(&self, sql: &str, param_sets: &[P]) -> Result<u64> {
        let shared = &self.shared;
        shared.core.execute_many(shared.storage(), sql, param_sets)
    }

    /// All remaining rows of the last result.
    pub fn fetchall(&self) -> Result<Vec<Row>> {
        self.shared.core.with_result(ExecutionContext::fetch_all)
    }

    /// The next row of the last result, or `None` once drained.
    pub fn fetchone(&self) -> Result<Option<Row>> {
        self.shared.core.with_result(ExecutionContext::fetch_one)
    }

    /// Up to `n` rows of the last result.
    pub fn fetchmany(&self, n: usize) -> Result<Vec<Row>> {
        self.shared.core.with_result(|ctx| ctx.fetch_many(n))
    }

    /// Column metadata of the last result.
    pub fn description(&self) -> Result<Arc<ColumnInfo>> {
        self.shared.core.with_result(ExecutionContext::description)
    }

    /// Rows changed by the last statement.
    pub fn rowcount(&self) -> Result<u64> {
        self.shared.core.with_result(ExecutionContext::rowcount)
    }

    /// Derive a cursor bound to the calling thread.
    ///
    /// The cursor inherits the connection's cross-thread setting and has its
    /// own execution context, so cursors never contend with each other except
    /// at the dataset.
    #[tracing::instrument(level = "debug", skip(self), fields(connection = self.shared.id))]
    pub fn cursor(&self) -> Result<Cursor> {
        let shared = &self.shared;
        shared.core.admit()?;

        let mut table = shared.table();
        // Checked under the table lock so close() sees every registered cursor
        shared.core.admit()?;
        table.next_id += 1;
        let id = table.next_id;
        let cursor = Cursor::new(id, Arc::clone(shared));
        table.live.insert(id, cursor.downgrade());
        tracing::debug!(cursor = id, live = table.live.len(), "Cursor created");
        Ok(cursor)
    }

    /// Close the connection and invalidate every cursor derived from it.
    ///
    /// Statements already running on the connection or a cursor finish first.
    /// Closing twice is a no-op.
    #[tracing::instrument(level = "debug", skip(self), fields(connection = self.shared.id))]
    pub fn close(&self) -> Result<()> {
        let shared = &self.shared;
        shared.core.guard().check()?;

        // Flag first so no new cursor registers after the snapshot below.
        if !shared.core.teardown(HandleKind::Connection) {
            return Ok(());
        }

        let cursors: Vec<Arc<CursorShared>> = shared
            .table()
            .live
            .drain()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();
        let invalidated = cursors
            .iter()
            .filter(|cursor| cursor.invalidate(HandleKind::Connection))
            .count();
        drop(cursors);

        tracing::debug!(invalidated, "Invalidated cursors");
        shared.storage.close()
    }

    /// Let any thread use this connection.
    pub fn release_thread(&self) -> Result<()> {
        self.shared.core.admit()?;
        self.shared.core.guard().release()
    }

    /// Bind this connection to the calling thread.
    pub fn bind_to_current_thread(&self) -> Result<()> {
        self.shared.core.admit()?;
        self.shared.core.guard().bind_to_current()
    }

    pub fn target(&self) -> &Target {
        &self.shared.config.target
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn allows_cross_thread_access(&self) -> bool {
        self.shared.mode() == ThreadMode::Relaxed
    }

    /// Cursors derived from this connection that are still alive and open.
    pub fn cursor_count(&self) -> usize {
        self.shared.table().live.len()
    }
}
