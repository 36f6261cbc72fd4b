//! Type encoding and decoding between `Value` and SQLite storage classes.
//!
//! SQLite has five storage classes (INTEGER, REAL, TEXT, BLOB, NULL). Booleans
//! bind as 0/1 and JSON binds as its text serialization. Reads never produce
//! `Bool` or `Json`; the declared column type is not consulted.

use crate::ffi;
use sqlshare_core::Value;
use std::ffi::{CStr, c_int};

/// Why a value could not be bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindFailure {
    /// The payload does not fit SQLite's 32-bit length argument.
    TooLarge { bytes: usize },
    /// SQLite rejected the bind with this result code.
    Code(c_int),
}

/// Bind a Value to a prepared statement parameter.
///
/// # Safety
/// - `stmt` must be a valid, non-null prepared statement handle
/// - `index` must be a valid 1-based parameter index
pub unsafe fn bind_value(
    stmt: *mut ffi::sqlite3_stmt,
    index: c_int,
    value: &Value,
) -> Result<(), BindFailure> {
    // SAFETY: caller guarantees stmt and index are valid; text and blob
    // payloads are copied by SQLite (SQLITE_TRANSIENT)
    let rc = unsafe {
        match value {
            Value::Null => ffi::sqlite3_bind_null(stmt, index),
            Value::Bool(b) => ffi::sqlite3_bind_int(stmt, index, i32::from(*b)),
            Value::Int(v) => ffi::sqlite3_bind_int(stmt, index, *v),
            Value::BigInt(v) => ffi::sqlite3_bind_int64(stmt, index, *v),
            Value::Double(v) => ffi::sqlite3_bind_double(stmt, index, *v),
            Value::Text(s) => bind_text(stmt, index, s)?,
            Value::Json(json) => bind_text(stmt, index, &json.to_string())?,
            Value::Bytes(b) => {
                let len = payload_len(b.len())?;
                ffi::sqlite3_bind_blob(stmt, index, b.as_ptr().cast(), len, ffi::transient())
            }
        }
    };

    if rc == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(BindFailure::Code(rc))
    }
}

unsafe fn bind_text(
    stmt: *mut ffi::sqlite3_stmt,
    index: c_int,
    text: &str,
) -> Result<c_int, BindFailure> {
    let len = payload_len(text.len())?;
    // SAFETY: caller guarantees stmt and index are valid
    Ok(unsafe {
        ffi::sqlite3_bind_text(stmt, index, text.as_ptr().cast(), len, ffi::transient())
    })
}

fn payload_len(bytes: usize) -> Result<c_int, BindFailure> {
    c_int::try_from(bytes).map_err(|_| BindFailure::TooLarge { bytes })
}

/// Read a column value from a result row.
///
/// # Safety
/// - `stmt` must be a valid prepared statement that has just returned SQLITE_ROW
/// - `index` must be a valid 0-based column index
pub unsafe fn read_column(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Value {
    // SAFETY: caller guarantees stmt is positioned on a row and index is in range
    unsafe {
        match ffi::sqlite3_column_type(stmt, index) {
            ffi::SQLITE_INTEGER => {
                let v = ffi::sqlite3_column_int64(stmt, index);
                // Choose the smallest representation
                i32::try_from(v).map_or(Value::BigInt(v), Value::Int)
            }

            ffi::SQLITE_FLOAT => Value::Double(ffi::sqlite3_column_double(stmt, index)),

            ffi::SQLITE_TEXT => {
                let ptr = ffi::sqlite3_column_text(stmt, index);
                let len = ffi::sqlite3_column_bytes(stmt, index);
                if ptr.is_null() {
                    Value::Null
                } else {
                    let slice = std::slice::from_raw_parts(ptr, usize::try_from(len).unwrap_or(0));
                    Value::Text(String::from_utf8_lossy(slice).into_owned())
                }
            }

            ffi::SQLITE_BLOB => {
                let ptr = ffi::sqlite3_column_blob(stmt, index);
                let len = usize::try_from(ffi::sqlite3_column_bytes(stmt, index)).unwrap_or(0);
                if ptr.is_null() || len == 0 {
                    Value::Bytes(Vec::new())
                } else {
                    Value::Bytes(std::slice::from_raw_parts(ptr.cast::<u8>(), len).to_vec())
                }
            }

            _ => Value::Null,
        }
    }
}

/// Get the column name from a result.
///
/// # Safety
/// - `stmt` must be a valid prepared statement
/// - `index` must be a valid 0-based column index
pub unsafe fn column_name(stmt: *mut ffi::sqlite3_stmt, index: c_int) -> Option<String> {
    // SAFETY: caller guarantees stmt and index are valid
    let ptr = unsafe { ffi::sqlite3_column_name(stmt, index) };
    if ptr.is_null() {
        None
    } else {
        // SAFETY: non-null pointer to a NUL-terminated string owned by the statement
        unsafe { CStr::from_ptr(ptr) }.to_str().ok().map(String::from)
    }
}
