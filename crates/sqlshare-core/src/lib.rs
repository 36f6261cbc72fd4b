//! Core types and traits for sqlshare.
//!
//! This crate provides the pieces shared by every layer:
//!
//! - `Value` for positional parameters and fetched cells
//! - `Row`, `ColumnInfo` and `ResultSet` for statement output
//! - `Error` with one variant per failure category
//! - `StorageCore`, the trait a dataset engine implements

pub mod error;
pub mod result;
pub mod row;
pub mod storage;
pub mod value;

pub use error::{
    BindingError, ClosedError, ConfigError, CrossThreadError, Error, ExecutionError,
    ExecutionErrorKind, HandleKind, Result, TypeError,
};
pub use result::ResultSet;
pub use row::{ColumnInfo, FromValue, Row};
pub use storage::StorageCore;
pub use value::Value;
