//! The seam between client handles and the dataset engine.
//!
//! A [`StorageCore`] owns one logical dataset. Handles never touch dataset
//! bytes; they submit a statement with positional parameters and get back a
//! fully materialized [`ResultSet`]. Implementations must serialize
//! concurrent submissions internally so that every write is atomic and all
//! writes to the dataset are totally ordered.

use crate::Result;
use crate::result::ResultSet;
use crate::value::Value;

/// An embedded dataset engine consumed as an opaque execution service.
pub trait StorageCore: Send + Sync {
    /// Run `sql` with positional `params` and materialize its result.
    ///
    /// Errors:
    /// - `Error::Binding` when the parameter count or a value does not fit the statement
    /// - `Error::Execution` for engine failures
    /// - `Error::Closed` once [`close`](Self::close) has run
    fn submit(&self, sql: &str, params: &[Value]) -> Result<ResultSet>;

    /// Release the dataset. Later submissions fail; calling again is a no-op.
    fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Human-readable label used in log events.
    fn describe(&self) -> String;
}
