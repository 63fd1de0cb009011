//! Error types for custody operations.

use std::io;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::undo::{SessionId, UndoId};

/// Failure reading or writing a durable record (log or whitelist).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot serialize record for {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from moving a file into or out of the graveyard.
#[derive(Debug, Error)]
pub enum CustodyError {
    #[error("Refusing to touch {path}: {reason}")]
    Forbidden { path: PathBuf, reason: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Not a regular file: {path}")]
    NotAFile { path: PathBuf },

    #[error("Path must be absolute: {path}")]
    NotAbsolute { path: PathBuf },

    #[error("Something already exists at {path}")]
    Conflict { path: PathBuf },

    #[error("Not inside the graveyard: {path}")]
    OutsideGraveyard { path: PathBuf },

    #[error("Copy of {path} did not verify: {message}")]
    VerifyFailed { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The log cannot describe this path, so nothing was moved.
    #[error("Cannot record {path} in the graveyard log: {source}")]
    Unrecordable {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    /// The file moved but the log entry could not be written.
    #[error("Moved to {path} but the log entry was not written: {source}")]
    Unlogged {
        path: PathBuf,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CustodyError {
    /// Classify an I/O error on `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::AlreadyExists => Self::Conflict { path },
            _ => Self::Io { path, source },
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Forbidden { .. } => FailureKind::Forbidden,
            Self::PermissionDenied { .. } => FailureKind::PermissionDenied,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::NotAFile { .. } | Self::NotAbsolute { .. } => FailureKind::NotAFile,
            Self::Conflict { .. } => FailureKind::Conflict,
            Self::OutsideGraveyard { .. } => FailureKind::OutsideGraveyard,
            Self::VerifyFailed { .. } => FailureKind::VerifyFailed,
            Self::Io { .. } => FailureKind::Io,
            Self::Unrecordable { .. } => FailureKind::Unrecordable,
            Self::Unlogged { .. } => FailureKind::Unlogged,
            Self::Store(_) => FailureKind::Store,
        }
    }
}

/// Errors from undo tokens and purge sessions.
#[derive(Debug, Error)]
pub enum UndoError {
    #[error("Unknown undo token {0}")]
    NotFound(UndoId),

    #[error("Undo token {0} was already used")]
    AlreadyConsumed(UndoId),

    #[error("Undo token {0} is being restored")]
    InProgress(UndoId),

    #[error("Unknown purge session {0}")]
    SessionNotFound(SessionId),

    #[error("Purge session {0} was already undone")]
    SessionConsumed(SessionId),

    #[error("Purge session {0} is being undone")]
    SessionInProgress(SessionId),

    #[error("Undo window for purge session {0} has closed")]
    Expired(SessionId),

    #[error(transparent)]
    Restore(#[from] CustodyError),
}

impl UndoError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Restore(err) => err.kind(),
            Self::NotFound(_) | Self::SessionNotFound(_) => FailureKind::NotFound,
            _ => FailureKind::Conflict,
        }
    }
}

/// Coarse failure category carried by [`OperationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Forbidden,
    PermissionDenied,
    NotFound,
    NotAFile,
    Conflict,
    OutsideGraveyard,
    VerifyFailed,
    Io,
    Unrecordable,
    Unlogged,
    Store,
}

/// A per-file failure collected by a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationError {
    /// The path that caused the error.
    pub path: PathBuf,
    pub kind: FailureKind,
    /// A human-readable error message.
    pub message: String,
}

impl OperationError {
    pub fn new(path: impl Into<PathBuf>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            message: message.into(),
        }
    }

    pub fn from_custody(path: impl Into<PathBuf>, error: &CustodyError) -> Self {
        Self::new(path, error.kind(), error.to_string())
    }
}

impl std::fmt::Display for OperationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}
