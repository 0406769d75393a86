//! Crate-wide error taxonomy.
//!
//! Each subsystem defines its own error enum close to where the failure
//! occurs (`storage::StorageError`, `sparql::ParseError`,
//! `sparql::QueryError`); this module unifies them into five externally
//! visible kinds: `Syntax`, `Storage`, `Concurrency`, `Disposed`,
//! `Timeout`. `TypeMismatch` never reaches this level — the filter
//! evaluator absorbs it per SPARQL effective-boolean-value rules.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::sparql::ParseError;
use crate::storage::StorageError;

/// A lock was re-entered from the same flow, or released without being
/// held, or timed out waiting to be acquired.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock recursion: the write lock is already held by this flow")]
    Recursion,
    #[error("lock released without being held")]
    NotHeld,
    #[error("timed out waiting for the lock")]
    TimedOut,
}

/// Failure acquiring a slot from the cross-process gate.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("timed out waiting for a gate slot")]
    TimedOut,
    #[error("gate backend failure: {0}")]
    Backend(String),
}

/// The single top-level error type returned by the public API.
#[derive(Debug, Error)]
pub enum ChronographError {
    #[error("syntax error at byte {offset}: {message}")]
    Syntax { offset: usize, message: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("concurrency error: {0}")]
    Concurrency(#[from] LockError),
    #[error("gate error: {0}")]
    Gate(#[from] GateError),
    #[error("operation attempted on a disposed store")]
    Disposed,
    #[error("operation timed out")]
    Timeout,
}

impl From<ParseError> for ChronographError {
    fn from(e: ParseError) -> Self {
        Self::Syntax {
            offset: e.offset,
            message: e.message,
        }
    }
}

impl From<io::Error> for ChronographError {
    fn from(e: io::Error) -> Self {
        Self::Storage(StorageError::Io(e))
    }
}

/// A coarse error category, exposed for callers that want to branch on
/// kind without matching the full error enum.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ErrorKind {
    Syntax,
    Storage,
    Concurrency,
    Disposed,
    Timeout,
}

impl ChronographError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Syntax { .. } => ErrorKind::Syntax,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Concurrency(_) => ErrorKind::Concurrency,
            Self::Gate(_) => ErrorKind::Timeout,
            Self::Disposed => ErrorKind::Disposed,
            Self::Timeout => ErrorKind::Timeout,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Syntax => "Syntax",
            Self::Storage => "Storage",
            Self::Concurrency => "Concurrency",
            Self::Disposed => "Disposed",
            Self::Timeout => "Timeout",
        })
    }
}

pub type Result<T> = std::result::Result<T, ChronographError>;
