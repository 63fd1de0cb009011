//! Error types for scanning and configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a scan cannot start or finish.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The root is refused by the path policy.
    #[error("Refusing to scan {path}: {reason}")]
    Forbidden { path: PathBuf, reason: String },

    /// The root could not be opened.
    #[error("Cannot open {path}: permission denied")]
    PermissionDenied { path: PathBuf },

    /// The root does not exist.
    #[error("No such directory: {path}")]
    NotFound { path: PathBuf },

    /// Any other failure touching the root.
    #[error("Cannot scan {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another scan of the same root is still running.
    #[error("A scan of {path} is already in progress")]
    AlreadyScanning { path: PathBuf },

    /// The background scan task died before producing a result.
    #[error("Scan task failed: {message}")]
    Interrupted { message: String },

    #[error("Bad scan settings: {message}")]
    InvalidConfig { message: String },

    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },
}

impl ScanError {
    /// Classify an I/O failure on `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }
}

/// Errors loading a keeper configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid config: {0}")]
    Invalid(String),

    /// A deny pattern is not a valid regular expression.
    #[error("Invalid deny pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },
}

/// Why part of a tree was left out of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    PermissionDenied,
    /// Directory listing failed.
    ReadError,
    /// `stat` failed on an entry that was listed.
    MetadataError,
    /// Directory refused by the path policy.
    Forbidden,
    /// Directory already visited through another link.
    SymlinkCycle,
}

/// A subtree or entry the scanner skipped. The scan carries on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub message: String,
    pub kind: WarningKind,
}

impl ScanWarning {
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// The path policy refused to descend into `path`.
    pub fn forbidden(path: impl Into<PathBuf>, reason: &str) -> Self {
        let path = path.into();
        Self {
            message: format!("Skipped {}: {reason}", path.display()),
            path,
            kind: WarningKind::Forbidden,
        }
    }

    /// `path` resolves to a directory the walk has already entered.
    pub fn symlink_cycle(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            message: format!("Already visited: {}", path.display()),
            path,
            kind: WarningKind::SymlinkCycle,
        }
    }

    /// An I/O failure on `path`. Permission problems are reported as such
    /// whatever `kind` the caller expected.
    pub fn io(path: impl Into<PathBuf>, error: &std::io::Error, kind: WarningKind) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::PermissionDenied => WarningKind::PermissionDenied,
            _ => kind,
        };
        Self::new(path, error.to_string(), kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_io() {
        let err = ScanError::io(
            "/test/path",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, ScanError::PermissionDenied { .. }));

        let err = ScanError::io("/x", std::io::Error::other("boom"));
        assert!(matches!(err, ScanError::Io { .. }));
    }

    #[test]
    fn test_read_error_kind() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let warning = ScanWarning::io("/test/path", &denied, WarningKind::MetadataError);
        assert_eq!(warning.kind, WarningKind::PermissionDenied);

        let broken = std::io::Error::other("bad sector");
        let warning = ScanWarning::io("/test/path", &broken, WarningKind::MetadataError);
        assert_eq!(warning.kind, WarningKind::MetadataError);
        assert_eq!(warning.message, "bad sector");

        let warning = ScanWarning::symlink_cycle("/loop");
        assert_eq!(warning.kind, WarningKind::SymlinkCycle);
        assert!(warning.message.contains("/loop"));
    }
}
