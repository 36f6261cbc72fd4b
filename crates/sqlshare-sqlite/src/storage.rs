//! SQLite-backed storage core.
//!
//! One `SqliteStorage` owns one `sqlite3` handle. The handle lives behind a
//! mutex that doubles as the dataset write lock: every submission runs to
//! completion (prepare, bind, step, materialize, finalize) while holding it,
//! so statements from any number of threads apply atomically and in a single
//! total order.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::borrow_as_ptr)] // FFI requires raw pointers

use crate::ffi;
use crate::types::{self, BindFailure};
use sqlshare_core::{
    BindingError, ColumnInfo, Error, ExecutionError, ExecutionErrorKind, HandleKind, ResultSet,
    Row, StorageCore, Value,
};
use std::ffi::{CString, c_char, c_int};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Path SQLite interprets as a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// Configuration for opening a SQLite dataset.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Open flags (read-only, read-write, create, etc.)
    pub flags: OpenFlags,
    /// Busy timeout in milliseconds, applied when another process holds the file lock.
    pub busy_timeout_ms: u32,
}

/// Flags controlling how the database is opened.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenFlags {
    /// Open for reading only.
    pub read_only: bool,
    /// Open for reading and writing.
    pub read_write: bool,
    /// Create the database if it doesn't exist.
    pub create: bool,
    /// Enable URI filename interpretation.
    pub uri: bool,
    /// Enable shared cache mode.
    pub shared_cache: bool,
    /// Disable shared cache mode.
    pub private_cache: bool,
}

impl OpenFlags {
    /// Create flags for read-only access.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access (database must exist).
    pub fn read_write() -> Self {
        Self {
            read_write: true,
            ..Default::default()
        }
    }

    /// Create flags for read-write access with creation if needed.
    pub fn create_read_write() -> Self {
        Self {
            read_write: true,
            create: true,
            ..Default::default()
        }
    }

    fn to_sqlite_flags(self) -> c_int {
        let mut flags = 0;

        if self.read_only {
            flags |= ffi::SQLITE_OPEN_READONLY;
        }
        if self.read_write {
            flags |= ffi::SQLITE_OPEN_READWRITE;
        }
        if self.create {
            flags |= ffi::SQLITE_OPEN_CREATE;
        }
        if self.uri {
            flags |= ffi::SQLITE_OPEN_URI;
        }
        if self.shared_cache {
            flags |= ffi::SQLITE_OPEN_SHAREDCACHE;
        }
        if self.private_cache {
            flags |= ffi::SQLITE_OPEN_PRIVATECACHE;
        }

        // Default to read-write if no mode specified
        if flags & (ffi::SQLITE_OPEN_READONLY | ffi::SQLITE_OPEN_READWRITE) == 0 {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        }

        // The handle is reached from many threads; always use serialized mode.
        flags | ffi::SQLITE_OPEN_FULLMUTEX
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: MEMORY_PATH.to_string(),
            flags: OpenFlags::create_read_write(),
            busy_timeout_ms: 5000,
        }
    }
}

impl SqliteConfig {
    /// Create a new config for a file-based database.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Create a new config for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Set open flags.
    pub fn flags(mut self, flags: OpenFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }
}

/// Owned database handle. Null once closed.
struct SqliteInner {
    db: *mut ffi::sqlite3,
}

// SAFETY: the handle is opened with SQLITE_OPEN_FULLMUTEX and every access goes
// through the surrounding Mutex.
unsafe impl Send for SqliteInner {}

/// A SQLite dataset shared by every handle of one connection.
pub struct SqliteStorage {
    inner: Mutex<SqliteInner>,
    path: String,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SqliteStorage {
    /// Open a dataset with the given configuration.
    ///
    /// Failures to open or validate the target are configuration errors: the
    /// target path is unusable, not a database, or cannot be created.
    #[tracing::instrument(level = "debug", skip(config), fields(path = %config.path))]
    pub fn open(config: &SqliteConfig) -> Result<Self, Error> {
        let c_path = CString::new(config.path.as_str())
            .map_err(|_| Error::config("Invalid database path: contains null byte"))?;

        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = config.flags.to_sqlite_flags();

        // SAFETY: We pass valid pointers and check the return value
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };

        if rc != ffi::SQLITE_OK {
            let msg = if db.is_null() {
                ffi::error_string(rc).to_string()
            } else {
                // SAFETY: db is a valid (failed) handle that must still be closed
                unsafe {
                    let msg = ffi::last_error_message(db);
                    ffi::sqlite3_close(db);
                    msg
                }
            };
            return Err(Error::config(format!(
                "Failed to open database '{}': {}",
                config.path, msg
            )));
        }

        if config.busy_timeout_ms > 0 {
            let ms = c_int::try_from(config.busy_timeout_ms).unwrap_or(c_int::MAX);
            // SAFETY: db is valid
            unsafe {
                ffi::sqlite3_busy_timeout(db, ms);
            }
        }

        let storage = Self {
            inner: Mutex::new(SqliteInner { db }),
            path: config.path.clone(),
        };

        // SQLite opens files lazily; touch the header so a foreign file is
        // rejected here rather than on the first statement.
        if let Err(e) = storage.submit("PRAGMA schema_version", &[]) {
            let _ = storage.close();
            return Err(Error::config(format!(
                "Database '{}' is not usable: {}",
                config.path, e
            )));
        }

        // SQLite quietly falls back to read-only when the file cannot be written.
        if !config.flags.read_only && storage.is_read_only() {
            let _ = storage.close();
            return Err(Error::config(format!(
                "Database '{}' is not writable",
                config.path
            )));
        }

        tracing::debug!(path = %storage.path, "Opened SQLite dataset");
        Ok(storage)
    }

    /// Open an in-memory database.
    pub fn open_memory() -> Result<Self, Error> {
        Self::open(&SqliteConfig::memory())
    }

    /// Open a file-based database.
    pub fn open_file(path: impl Into<String>) -> Result<Self, Error> {
        Self::open(&SqliteConfig::file(path))
    }

    /// Wrap the storage for sharing between handles.
    pub fn into_shared(self) -> Arc<dyn StorageCore> {
        Arc::new(self)
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Whether the open dataset rejects writes.
    pub fn is_read_only(&self) -> bool {
        let inner = self.lock();
        // SAFETY: db is valid while the lock is held and the schema name is NUL-terminated
        !inner.db.is_null() && unsafe { ffi::sqlite3_db_readonly(inner.db, c"main".as_ptr()) } == 1
    }

    fn lock(&self) -> MutexGuard<'_, SqliteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a submission. A failure never leaves behind a transaction the
    /// submission itself opened.
    fn run(db: *mut ffi::sqlite3, sql: &str, params: &[Value]) -> Result<ResultSet, Error> {
        // SAFETY: db is valid while the storage lock is held
        let was_autocommit = unsafe { ffi::sqlite3_get_autocommit(db) } != 0;
        let result = Self::run_statements(db, sql, params);

        // SAFETY: db is valid while the storage lock is held
        if result.is_err() && was_autocommit && unsafe { ffi::sqlite3_get_autocommit(db) } == 0 {
            // SAFETY: db is valid and the statement text is NUL-terminated
            let rc = unsafe {
                ffi::sqlite3_exec(
                    db,
                    c"ROLLBACK".as_ptr(),
                    None,
                    ptr::null_mut(),
                    ptr::null_mut(),
                )
            };
            tracing::debug!(rc, sql = %sql, "Rolled back transaction opened by failed submission");
        }
        result
    }

    fn run_statements(
        db: *mut ffi::sqlite3,
        sql: &str,
        params: &[Value],
    ) -> Result<ResultSet, Error> {
        let c_sql = CString::new(sql).map_err(|_| {
            Error::Execution(ExecutionError {
                kind: ExecutionErrorKind::Syntax,
                sql: Some(sql.to_string()),
                message: "SQL contains null byte".to_string(),
                source: None,
            })
        })?;

        let bytes = c_sql.as_bytes();
        // SAFETY: the range stays inside the CString buffer
        let end = unsafe { c_sql.as_ptr().add(bytes.len()) };
        let mut cursor: *const c_char = c_sql.as_ptr();
        let mut result = ResultSet::empty(0);
        let mut first = true;

        // SAFETY: db is valid while the storage lock is held
        let changes_before = unsafe { ffi::sqlite3_total_changes(db) };

        while cursor < end {
            let (stmt, tail) = Statement::prepare(db, sql, cursor, end)?;
            let Some(stmt) = stmt else {
                // Whitespace or a comment only
                cursor = tail;
                continue;
            };

            if first {
                if !params.is_empty() {
                    // SAFETY: tail points into the CString buffer
                    let offset = unsafe { tail.offset_from(c_sql.as_ptr()) };
                    let rest = bytes
                        .get(usize::try_from(offset).unwrap_or(0)..)
                        .unwrap_or_default();
                    if contains_statement(rest) {
                        return Err(Error::Binding(BindingError {
                            sql: Some(sql.to_string()),
                            expected: None,
                            actual: params.len(),
                            message: "parameters are only supported for a single statement"
                                .to_string(),
                        }));
                    }
                }
                stmt.bind_all(sql, params)?;
            }
            first = false;

            result = stmt.materialize(db, sql)?;
            cursor = tail;
        }

        // SAFETY: db is valid while the storage lock is held
        let changes_after = unsafe { ffi::sqlite3_total_changes(db) };
        let affected = u64::try_from(changes_after - changes_before).unwrap_or(0);

        if first && !params.is_empty() {
            return Err(Error::Binding(BindingError {
                sql: Some(sql.to_string()),
                expected: Some(0),
                actual: params.len(),
                message: "statement text is empty".to_string(),
            }));
        }

        let columns = Arc::clone(result.columns());
        let rows = result.drain();
        Ok(ResultSet::new(columns, rows, affected))
    }
}

impl StorageCore for SqliteStorage {
    fn submit(&self, sql: &str, params: &[Value]) -> Result<ResultSet, Error> {
        let inner = self.lock();
        if inner.db.is_null() {
            return Err(Error::closed(HandleKind::Connection));
        }
        tracing::trace!(sql = %sql, params = params.len(), "Submitting statement");
        Self::run(inner.db, sql, params)
    }

    fn close(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.db.is_null() {
            return Ok(());
        }
        // SAFETY: db is valid and no statement outlives a submission
        let rc = unsafe { ffi::sqlite3_close(inner.db) };
        inner.db = ptr::null_mut();
        if rc != ffi::SQLITE_OK {
            return Err(Error::Execution(ExecutionError {
                kind: error_code_to_kind(rc),
                sql: None,
                message: format!("Failed to close database: {}", ffi::error_string(rc)),
                source: None,
            }));
        }
        tracing::debug!(path = %self.path, "Closed SQLite dataset");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.lock().db.is_null()
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

impl Drop for SqliteStorage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A prepared statement, finalized on drop.
struct Statement {
    raw: *mut ffi::sqlite3_stmt,
}

impl Drop for Statement {
    fn drop(&mut self) {
        // SAFETY: raw is a valid statement owned by this wrapper
        unsafe {
            ffi::sqlite3_finalize(self.raw);
        }
    }
}

impl Statement {
    /// Prepare the next statement starting at `start`.
    ///
    /// Returns `None` when the remaining text holds no statement.
    fn prepare(
        db: *mut ffi::sqlite3,
        sql: &str,
        start: *const c_char,
        end: *const c_char,
    ) -> Result<(Option<Self>, *const c_char), Error> {
        let mut raw: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        // SAFETY: start and end point into the same CString buffer
        let len = unsafe { end.offset_from(start) };
        let len = c_int::try_from(len).map_err(|_| {
            Error::Execution(ExecutionError {
                kind: ExecutionErrorKind::DataTruncation,
                sql: Some(sql.to_string()),
                message: "SQL text too long".to_string(),
                source: None,
            })
        })?;

        // SAFETY: All pointers are valid
        let rc = unsafe { ffi::sqlite3_prepare_v2(db, start, len, &mut raw, &mut tail) };
        if rc != ffi::SQLITE_OK {
            // SAFETY: db is valid
            return Err(unsafe { engine_error(db, rc, sql) });
        }

        let tail = if tail.is_null() { end } else { tail };
        let stmt = if raw.is_null() {
            None
        } else {
            Some(Self { raw })
        };
        Ok((stmt, tail))
    }

    fn bind_all(&self, sql: &str, params: &[Value]) -> Result<(), Error> {
        // SAFETY: raw is valid
        let declared = unsafe { ffi::sqlite3_bind_parameter_count(self.raw) };
        let declared = usize::try_from(declared).unwrap_or(0);
        if declared != params.len() {
            return Err(Error::Binding(BindingError {
                sql: Some(sql.to_string()),
                expected: Some(declared),
                actual: params.len(),
                message: "wrong number of parameters".to_string(),
            }));
        }

        for (i, param) in params.iter().enumerate() {
            // SAFETY: raw is valid and the index is 1-based and within `declared`
            let bound = unsafe { types::bind_value(self.raw, (i + 1) as c_int, param) };
            if let Err(failure) = bound {
                let reason = match failure {
                    BindFailure::TooLarge { bytes } => format!("{} bytes exceeds limit", bytes),
                    BindFailure::Code(rc) => ffi::error_string(rc).to_string(),
                };
                return Err(Error::Binding(BindingError {
                    sql: Some(sql.to_string()),
                    expected: Some(declared),
                    actual: params.len(),
                    message: format!(
                        "cannot bind {} to parameter {}: {}",
                        param.type_name(),
                        i + 1,
                        reason
                    ),
                }));
            }
        }
        Ok(())
    }

    /// Step to completion, collecting every row.
    fn materialize(&self, db: *mut ffi::sqlite3, sql: &str) -> Result<ResultSet, Error> {
        // SAFETY: raw is valid
        let col_count = unsafe { ffi::sqlite3_column_count(self.raw) };
        let names = (0..col_count)
            .map(|i| {
                // SAFETY: raw is valid and i < col_count
                unsafe { types::column_name(self.raw, i) }.unwrap_or_else(|| format!("col{}", i))
            })
            .collect();
        let columns = Arc::new(ColumnInfo::new(names));

        let mut rows = Vec::new();
        loop {
            // SAFETY: raw is valid
            let rc = unsafe { ffi::sqlite3_step(self.raw) };
            match rc {
                ffi::SQLITE_ROW => {
                    let values = (0..col_count)
                        // SAFETY: we just got SQLITE_ROW and i < col_count
                        .map(|i| unsafe { types::read_column(self.raw, i) })
                        .collect();
                    rows.push(Row::with_columns(Arc::clone(&columns), values));
                }
                ffi::SQLITE_DONE => break,
                _ => {
                    // SAFETY: db is valid
                    return Err(unsafe { engine_error(db, rc, sql) });
                }
            }
        }

        Ok(ResultSet::new(columns, rows, 0))
    }
}

/// Whether `text` holds anything besides whitespace, semicolons and comments.
///
/// Scans lexically so that statements after the first are never compiled
/// against a schema the first statement has yet to create.
fn contains_statement(text: &[u8]) -> bool {
    let mut i = 0;
    while i < text.len() {
        match text[i] {
            b';' => i += 1,
            b if b.is_ascii_whitespace() => i += 1,
            b'-' if text.get(i + 1) == Some(&b'-') => {
                i = text[i..]
                    .iter()
                    .position(|&c| c == b'\n')
                    .map_or(text.len(), |p| i + p + 1);
            }
            b'/' if text.get(i + 1) == Some(&b'*') => {
                i = text[i + 2..]
                    .windows(2)
                    .position(|w| w == b"*/")
                    .map_or(text.len(), |p| i + 2 + p + 2);
            }
            _ => return true,
        }
    }
    false
}

/// Build an execution error from the handle's last error.
///
/// # Safety
/// `db` must be a valid connection handle.
unsafe fn engine_error(db: *mut ffi::sqlite3, rc: c_int, sql: &str) -> Error {
    // SAFETY: caller guarantees db is valid
    let (message, code) = unsafe { (ffi::last_error_message(db), ffi::sqlite3_errcode(db)) };
    let code = if code == ffi::SQLITE_OK { rc } else { code };
    Error::Execution(ExecutionError {
        kind: error_code_to_kind(code),
        sql: Some(sql.to_string()),
        message,
        source: None,
    })
}

fn error_code_to_kind(code: c_int) -> ExecutionErrorKind {
    match ffi::primary_code(code) {
        ffi::SQLITE_CONSTRAINT => ExecutionErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => ExecutionErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => {
            ExecutionErrorKind::Permission
        }
        ffi::SQLITE_NOTFOUND => ExecutionErrorKind::NotFound,
        ffi::SQLITE_TOOBIG => ExecutionErrorKind::DataTruncation,
        ffi::SQLITE_INTERRUPT => ExecutionErrorKind::Interrupted,
        _ => ExecutionErrorKind::Database,
    }
}
