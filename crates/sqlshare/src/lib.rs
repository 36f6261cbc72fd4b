//! sqlshare - embedded database connections shared across OS threads.
//!
//! A [`Connection`] is the root handle to one dataset. It can be cloned and
//! handed to other threads, and it derives [`Cursor`]s: independent execution
//! handles with their own result buffers that share the connection's dataset.
//!
//! - **Strict mode** (the default): every handle belongs to the thread that
//!   created it. Calls from any other thread fail with
//!   [`Error::CrossThread`] before touching any state, until the handle is
//!   released with `release_thread()`.
//! - **Relaxed mode** (`allow_cross_thread_access`): any thread may call any
//!   handle. Calls on one handle are serialized; distinct cursors only meet
//!   at the dataset, where statements apply one at a time in a single order.
//!
//! Closing a connection waits for in-flight statements, then invalidates the
//! connection and every cursor derived from it.
//!
//! # Quick Start
//!
//! ```
//! use sqlshare::prelude::*;
//! use std::thread;
//!
//! let conn = Connection::open_with_config(
//!     ConnectionConfig::memory().allow_cross_thread_access(true),
//! )
//! .unwrap();
//! conn.execute("CREATE TABLE names (name TEXT)", &[]).unwrap();
//!
//! let workers: Vec<_> = ["alpha", "beta"]
//!     .into_iter()
//!     .map(|name| {
//!         let conn = conn.clone();
//!         thread::spawn(move || {
//!             let cur = conn.cursor().unwrap();
//!             cur.execute("INSERT INTO names VALUES (?)", &params![name])
//!                 .unwrap();
//!         })
//!     })
//!     .collect();
//! for worker in workers {
//!     worker.join().unwrap();
//! }
//!
//! let rows = conn
//!     .execute("SELECT name FROM names ORDER BY name", &[])
//!     .unwrap()
//!     .fetchall()
//!     .unwrap();
//! assert_eq!(rows.len(), 2);
//! conn.close().unwrap();
//! ```

pub mod config;
pub mod connection;
mod context;
pub mod cursor;
pub mod guard;
mod handle;

pub use config::{ConnectionConfig, Target};
pub use connection::Connection;
pub use cursor::Cursor;
pub use guard::{Affinity, ThreadMode};

pub use sqlshare_core::{
    BindingError, ClosedError, ColumnInfo, ConfigError, CrossThreadError, Error, ExecutionError,
    ExecutionErrorKind, FromValue, HandleKind, Result, ResultSet, Row, StorageCore, TypeError,
    Value, params,
};
pub use sqlshare_sqlite::{sqlite_version, sqlite_version_number};

/// Common imports.
///
/// ```
/// use sqlshare::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{Connection, ConnectionConfig, Cursor, Error, Result, Row, Target, Value, params};
}
