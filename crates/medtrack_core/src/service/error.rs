//! Public error taxonomy of the tracker facade.
//!
//! # Responsibility
//! - Map repository, storage and validation failures onto the five classes
//!   callers act on (validation, not found, conflict, lock timeout, storage).
//! - Expose stable machine codes so API layers never match on messages.

use crate::db::DbError;
use crate::model::medicine::{MedicineId, MedicineValidationError};
use crate::model::schedule::ScheduleError;
use crate::repo::{ConflictKind, RepoError};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type TrackerResult<T> = Result<T, TrackerError>;

/// Error returned by every `MedicineTracker` operation.
#[derive(Debug)]
pub enum TrackerError {
    /// Caller input rejected; never retried.
    Validation {
        field: &'static str,
        message: String,
    },
    NotFound(MedicineId),
    /// Duplicate terminal event or insufficient inventory.
    Conflict(ConflictKind),
    /// Write lock still held after all retry attempts.
    LockTimeout { attempts: u32 },
    /// Engine or persisted-data failure.
    Storage(RepoError),
    /// Configuration could not be loaded or is invalid.
    Config(String),
}

impl TrackerError {
    pub(crate) fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Stable machine code for API mapping.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound(_) => "RESOURCE_NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::Storage(_) => "DATABASE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// True when the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Transient SQLite lock contention, retried internally before it
    /// becomes `LockTimeout`.
    pub(crate) fn is_lock_contention(&self) -> bool {
        matches!(self, Self::Storage(RepoError::Db(err)) if err.is_lock_contention())
    }
}

impl Display for TrackerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation { field, message } => write!(f, "invalid `{field}`: {message}"),
            Self::NotFound(id) => write!(f, "medicine not found: {id}"),
            Self::Conflict(kind) => write!(f, "conflict: {kind}"),
            Self::LockTimeout { attempts } => {
                write!(f, "database is locked after {attempts} attempts")
            }
            Self::Storage(err) => write!(f, "storage failure: {err}"),
            Self::Config(message) => write!(f, "invalid configuration: {message}"),
        }
    }
}

impl Error for TrackerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for TrackerError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::Conflict(kind) => Self::Conflict(kind),
            other => Self::Storage(other),
        }
    }
}

impl From<DbError> for TrackerError {
    fn from(value: DbError) -> Self {
        Self::Storage(RepoError::Db(value))
    }
}

impl From<rusqlite::Error> for TrackerError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(RepoError::Db(DbError::Sqlite(value)))
    }
}

impl From<MedicineValidationError> for TrackerError {
    fn from(value: MedicineValidationError) -> Self {
        Self::Validation {
            field: value.field(),
            message: value.to_string(),
        }
    }
}

impl From<ScheduleError> for TrackerError {
    fn from(value: ScheduleError) -> Self {
        Self::Config(value.to_string())
    }
}
