//! Connection configuration.

use serde::{Deserialize, Serialize};
use sqlshare_core::{ConfigError, Error, Result};
use sqlshare_sqlite::{MEMORY_PATH, OpenFlags, SqliteConfig};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a connection's dataset lives.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Target {
    /// Private in-memory dataset, gone when the last handle is dropped
    #[default]
    Memory,
    /// Durable dataset at a filesystem path
    Path(PathBuf),
}

impl Target {
    /// Parse a target string. `""` and `":memory:"` select an in-memory dataset.
    pub fn parse(s: &str) -> Self {
        if s.is_empty() || s == MEMORY_PATH {
            Target::Memory
        } else {
            Target::Path(PathBuf::from(s))
        }
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Target::Memory)
    }

    /// Check the target can host a dataset and return the engine path for it.
    pub fn storage_path(&self) -> Result<String> {
        let path = match self {
            Target::Memory => return Ok(MEMORY_PATH.to_string()),
            Target::Path(path) => path,
        };

        if path.is_dir() {
            return Err(Error::config(format!(
                "Target '{}' is a directory",
                path.display()
            )));
        }
        let missing_parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty() && !p.is_dir());
        if let Some(parent) = missing_parent {
            return Err(Error::config(format!(
                "Target directory '{}' does not exist",
                parent.display()
            )));
        }
        let text = path.to_str().ok_or_else(|| {
            Error::config(format!("Target '{}' is not valid UTF-8", path.display()))
        })?;
        if text.contains('\0') {
            return Err(Error::config("Target path contains null byte"));
        }
        Ok(text.to_string())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Memory => write!(f, "{}", MEMORY_PATH),
            Target::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

impl From<&str> for Target {
    fn from(s: &str) -> Self {
        Target::parse(s)
    }
}

impl From<String> for Target {
    fn from(s: String) -> Self {
        Target::parse(&s)
    }
}

impl From<PathBuf> for Target {
    fn from(path: PathBuf) -> Self {
        Target::Path(path)
    }
}

impl From<&Path> for Target {
    fn from(path: &Path) -> Self {
        Target::Path(path.to_path_buf())
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

/// Configuration for opening a [`Connection`](crate::Connection).
///
/// ```
/// use sqlshare::{ConnectionConfig, Target};
///
/// let config = ConnectionConfig::from_json(
///     r#"{ "target": ":memory:", "allow_cross_thread_access": true }"#,
/// )
/// .unwrap();
/// assert_eq!(config.target, Target::Memory);
/// assert!(config.allow_cross_thread_access);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Dataset location.
    pub target: Target,
    /// Allow any thread to use the connection and its cursors.
    ///
    /// When false (the default) every handle is bound to the thread that
    /// created it until explicitly released.
    pub allow_cross_thread_access: bool,
    /// Open the dataset read-only.
    pub read_only: bool,
    /// How long the engine waits on a file lock held by another process.
    pub busy_timeout_ms: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target: Target::Memory,
            allow_cross_thread_access: false,
            read_only: false,
            busy_timeout_ms: 5000,
        }
    }
}

impl ConnectionConfig {
    /// Create a config for the given target.
    pub fn new(target: impl Into<Target>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Create a config for an in-memory dataset.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("Invalid connection config: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }

    /// Set the target.
    pub fn target(mut self, target: impl Into<Target>) -> Self {
        self.target = target.into();
        self
    }

    /// Set cross-thread access.
    pub fn allow_cross_thread_access(mut self, allow: bool) -> Self {
        self.allow_cross_thread_access = allow;
        self
    }

    /// Set read-only mode.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Set busy timeout.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    /// Translate into the storage layer's open configuration.
    pub fn to_sqlite_config(&self) -> Result<SqliteConfig> {
        if self.read_only && self.target.is_memory() {
            return Err(Error::config(
                "An in-memory dataset cannot be opened read-only",
            ));
        }
        let flags = if self.read_only {
            OpenFlags::read_only()
        } else {
            OpenFlags::create_read_write()
        };
        Ok(SqliteConfig::file(self.target.storage_path()?)
            .flags(flags)
            .busy_timeout(self.busy_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse() {
        assert_eq!(Target::parse(""), Target::Memory);
        assert_eq!(Target::parse(":memory:"), Target::Memory);
        assert_eq!(
            Target::parse("data.db"),
            Target::Path(PathBuf::from("data.db"))
        );
        assert_eq!(Target::Memory.to_string(), ":memory:");
    }

    #[test]
    fn test_target_serde_as_string() {
        let json = serde_json::to_string(&Target::Path(PathBuf::from("a.db"))).unwrap();
        assert_eq!(json, r#""a.db""#);
        let back: Target = serde_json::from_str(r#"":memory:""#).unwrap();
        assert_eq!(back, Target::Memory);
    }

    #[test]
    fn test_storage_path_rejects_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::Path(dir.path().join("nope").join("data.db"));
        assert!(matches!(target.storage_path(), Err(Error::Config(_))));
    }

    #[test]
    fn test_storage_path_rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = Target::Path(dir.path().to_path_buf());
        assert!(matches!(target.storage_path(), Err(Error::Config(_))));
    }

    #[test]
    fn test_storage_path_accepts_relative_file() {
        assert_eq!(
            Target::parse("local.db").storage_path().unwrap(),
            "local.db"
        );
    }

    #[test]
    fn test_config_defaults_and_builder() {
        let config = ConnectionConfig::default();
        assert!(config.target.is_memory());
        assert!(!config.allow_cross_thread_access);

        let config = ConnectionConfig::new("x.db")
            .allow_cross_thread_access(true)
            .busy_timeout(10);
        assert_eq!(config.target, Target::Path(PathBuf::from("x.db")));
        assert!(config.allow_cross_thread_access);
        assert_eq!(config.busy_timeout_ms, 10);
    }

    #[test]
    fn test_from_json_partial_and_invalid() {
        let config = ConnectionConfig::from_json("{}").unwrap();
        assert_eq!(config, ConnectionConfig::default());

        match ConnectionConfig::from_json(r#"{ "allow_cross_thread_access": "yes" }"#) {
            Err(Error::Config(e)) => assert!(e.source.is_some()),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn test_read_only_memory_rejected() {
        let config = ConnectionConfig::memory().read_only(true);
        assert!(matches!(config.to_sqlite_config(), Err(Error::Config(_))));
    }
}
