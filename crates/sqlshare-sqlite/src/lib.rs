//! SQLite storage core for sqlshare.
//!
// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]
//!
//! This crate provides the dataset engine behind a sqlshare connection. It
//! implements the `StorageCore` trait from sqlshare-core over a bundled
//! libsqlite3.
//!
//! # Features
//!
//! - In-memory and file-based datasets
//! - Positional parameter binding with arity checks
//! - Multi-statement scripts (parameters only for single statements)
//! - Configurable open flags and busy timeout
//!
//! # Example
//!
//! ```rust
//! use sqlshare_core::{StorageCore, Value};
//! use sqlshare_sqlite::SqliteStorage;
//!
//! let storage = SqliteStorage::open_memory().unwrap();
//! storage.submit("CREATE TABLE users (name TEXT)", &[]).unwrap();
//! storage
//!     .submit("INSERT INTO users VALUES (?)", &[Value::Text("Alice".into())])
//!     .unwrap();
//! let mut rows = storage.submit("SELECT name FROM users", &[]).unwrap();
//! assert_eq!(rows.remaining(), 1);
//! ```
//!
//! # Type Mapping
//!
//! | `Value` | SQLite storage class |
//! |---------|----------------------|
//! | `Null` | NULL |
//! | `Bool` | INTEGER (0/1) |
//! | `Int`, `BigInt` | INTEGER |
//! | `Double` | REAL |
//! | `Text` | TEXT |
//! | `Bytes` | BLOB |
//! | `Json` | TEXT |
//!
//! # Thread Safety
//!
//! `SqliteStorage` is `Send` and `Sync`. The SQLite handle is opened in
//! serialized mode and guarded by a mutex, which is the single point where
//! submissions from different threads are ordered.

pub mod ffi;
pub mod storage;
pub mod types;

pub use storage::{MEMORY_PATH, OpenFlags, SqliteConfig, SqliteStorage};

/// Re-export the SQLite library version.
pub fn sqlite_version() -> &'static str {
    ffi::version()
}

/// Re-export the SQLite library version number.
pub fn sqlite_version_number() -> i32 {
    ffi::version_number()
}
