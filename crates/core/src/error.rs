//! Error taxonomy shared by every subsystem.
//!
//! Callers across the RPC boundary only see the coarse [`ErrorKind`];
//! the full error carries enough context for logs.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Coarse error classification for callers that only dispatch on kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// File missing, access denied, disk full, invalid path.
    Io,
    /// Malformed signature database, quarantine index, or archive.
    Format,
    /// Not initialized, already scanning, cancelled, shutting down.
    State,
    /// Too-large file, too-deep nesting, extraction budget exceeded.
    Resource,
    /// Unknown quarantine entry id or watched path.
    NotFound,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed data: {reason}")]
    Format { reason: String },

    #[error("invalid state: {reason}")]
    State { reason: String },

    #[error("resource limit exceeded: {reason}")]
    Resource { reason: String },

    #[error("{what} not found")]
    NotFound { what: String },
}

impl EngineError {
    pub fn format(reason: impl Into<String>) -> Self {
        EngineError::Format {
            reason: reason.into(),
        }
    }

    pub fn state(reason: impl Into<String>) -> Self {
        EngineError::State {
            reason: reason.into(),
        }
    }

    pub fn resource(reason: impl Into<String>) -> Self {
        EngineError::Resource {
            reason: reason.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound { what: what.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Io(_) => ErrorKind::Io,
            EngineError::Format { .. } => ErrorKind::Format,
            EngineError::State { .. } => ErrorKind::State,
            EngineError::Resource { .. } => ErrorKind::Resource,
            EngineError::NotFound { .. } => ErrorKind::NotFound,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        let err = EngineError::from(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(EngineError::format("bad magic").kind(), ErrorKind::Format);
        assert_eq!(EngineError::state("already scanning").kind(), ErrorKind::State);
        assert_eq!(EngineError::resource("too deep").kind(), ErrorKind::Resource);
        assert_eq!(EngineError::not_found("entry 42").kind(), ErrorKind::NotFound);
    }
}
