//! Error types for sqlshare operations.

use std::fmt;
use std::thread::ThreadId;

/// The primary error type for all sqlshare operations.
#[derive(Debug)]
pub enum Error {
    /// Bad target or configuration at open time
    Config(ConfigError),
    /// Operation on a closed connection or cursor
    Closed(ClosedError),
    /// Strict-mode thread affinity violation
    CrossThread(CrossThreadError),
    /// Parameter arity or type mismatch
    Binding(BindingError),
    /// Fetch without a successful prior execute
    NoActiveResult,
    /// Storage core failure
    Execution(ExecutionError),
    /// Type conversion errors on row access
    Type(TypeError),
}

/// Which kind of handle an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// The root connection handle
    Connection,
    /// A cursor derived from a connection
    Cursor,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Connection => write!(f, "connection"),
            HandleKind::Cursor => write!(f, "cursor"),
        }
    }
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy)]
pub struct ClosedError {
    pub handle: HandleKind,
}

#[derive(Debug, Clone)]
pub struct CrossThreadError {
    pub handle: HandleKind,
    /// Thread the handle is bound to
    pub bound: ThreadId,
    /// Thread that attempted the call
    pub caller: ThreadId,
}

#[derive(Debug, Clone)]
pub struct BindingError {
    pub sql: Option<String>,
    /// Parameters the statement declares, when known
    pub expected: Option<usize>,
    /// Parameters supplied by the caller
    pub actual: usize,
    pub message: String,
}

#[derive(Debug)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, not null, check, ...)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Permission denied or read-only target
    Permission,
    /// Data too large
    DataTruncation,
    /// Dataset locked by another process
    Busy,
    /// Interrupted by the engine
    Interrupted,
    /// Other engine error
    Database,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    /// Is this an error a caller may reasonably retry (engine busy)?
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Execution(e) if e.kind == ExecutionErrorKind::Busy)
    }

    /// Did this error come from using a closed handle?
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed(_))
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Execution(e) => e.sql.as_deref(),
            Error::Binding(e) => e.sql.as_deref(),
            _ => None,
        }
    }

    /// Shorthand for a configuration error without a source.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for a closed-handle error.
    pub fn closed(handle: HandleKind) -> Self {
        Error::Closed(ClosedError { handle })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Closed(e) => write!(f, "Closed {} error: {}", e.handle, e),
            Error::CrossThread(e) => write!(f, "Cross-thread access error: {}", e),
            Error::Binding(e) => write!(f, "Parameter binding error: {}", e),
            Error::NoActiveResult => write!(f, "No active result: execute must succeed first"),
            Error::Execution(e) => write!(f, "Execution error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Execution(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} already closed", self.handle)
    }
}

impl fmt::Display for CrossThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bound to thread {:?} used from thread {:?}; release it from its thread first",
            self.handle, self.bound, self.caller
        )
    }
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.expected {
            Some(expected) => write!(
                f,
                "{} (expected {} parameters, got {})",
                self.message, expected, self.actual
            ),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(col) = &self.column {
            write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            )
        } else {
            write!(f, "expected {}, found {}", self.expected, self.actual)
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<ClosedError> for Error {
    fn from(err: ClosedError) -> Self {
        Error::Closed(err)
    }
}

impl From<CrossThreadError> for Error {
    fn from(err: CrossThreadError) -> Self {
        Error::CrossThread(err)
    }
}

impl From<BindingError> for Error {
    fn from(err: BindingError) -> Self {
        Error::Binding(err)
    }
}

impl From<ExecutionError> for Error {
    fn from(err: ExecutionError) -> Self {
        Error::Execution(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

/// Result type alias for sqlshare operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_retryable() {
        let busy = Error::Execution(ExecutionError {
            kind: ExecutionErrorKind::Busy,
            sql: Some("INSERT INTO t VALUES (1)".to_string()),
            message: "database is locked".to_string(),
            source: None,
        });
        assert!(busy.is_retryable());
        assert_eq!(busy.sql(), Some("INSERT INTO t VALUES (1)"));

        let constraint = Error::Execution(ExecutionError {
            kind: ExecutionErrorKind::Constraint,
            sql: None,
            message: "UNIQUE constraint failed".to_string(),
            source: None,
        });
        assert!(!constraint.is_retryable());
        assert!(!Error::NoActiveResult.is_retryable());
    }

    #[test]
    fn closed_error_names_handle() {
        let err = Error::closed(HandleKind::Cursor);
        assert!(err.is_closed());
        assert_eq!(err.to_string(), "Closed cursor error: cursor already closed");
    }

    #[test]
    fn binding_error_reports_arity() {
        let err = Error::Binding(BindingError {
            sql: Some("INSERT INTO t VALUES (?, ?)".to_string()),
            expected: Some(2),
            actual: 1,
            message: "wrong number of parameters".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Parameter binding error: wrong number of parameters (expected 2 parameters, got 1)"
        );
    }

    #[test]
    fn cross_thread_error_display_mentions_release() {
        let main = std::thread::current().id();
        let other = std::thread::spawn(|| std::thread::current().id())
            .join()
            .unwrap();
        let err = Error::CrossThread(CrossThreadError {
            handle: HandleKind::Connection,
            bound: main,
            caller: other,
        });
        assert!(err.to_string().contains("release it"));
    }
}
