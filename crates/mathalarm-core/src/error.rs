//! Core error types for mathalarm-core.
//!
//! `AlarmError` is the taxonomy every alarm, puzzle and session operation
//! reports. Storage and configuration failures have their own enums and
//! fold into it (or into `CoreError` at the CLI boundary) via `#[from]`.

use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Errors surfaced by the alarm lifecycle, puzzle engine and dismissal session.
#[derive(Error, Debug)]
pub enum AlarmError {
    /// Window starts in the past or ends before it starts.
    #[error("Invalid alarm window: {reason} (start {start}, end {end})")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        reason: &'static str,
    },

    /// Window is shorter than the profile minimum.
    #[error("Alarm window of {}s is shorter than the minimum of {}s", .actual.num_seconds(), .min.num_seconds())]
    DurationTooShort { actual: Duration, min: Duration },

    /// Window is longer than the maximum.
    #[error("Alarm window of {}s exceeds the maximum of {}s", .actual.num_seconds(), .max.num_seconds())]
    DurationTooLong { actual: Duration, max: Duration },

    /// Overlap with a scheduled alarm, or another alarm is already active.
    #[error("Alarm conflict: {0}")]
    Conflict(String),

    /// Unknown alarm or puzzle id.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Answer input was blank.
    #[error("Answer is empty")]
    EmptyInput,

    /// Answer input is not an integer.
    #[error("Answer '{0}' is not a number")]
    NotANumber(String),

    /// Durable store failed.
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] DatabaseError),
}

impl AlarmError {
    pub(crate) fn alarm_not_found(id: &str) -> Self {
        AlarmError::NotFound {
            kind: "Alarm",
            id: id.to_string(),
        }
    }

    pub(crate) fn puzzle_not_found(id: &str) -> Self {
        AlarmError::NotFound {
            kind: "Puzzle",
            id: id.to_string(),
        }
    }
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),
}

/// Umbrella error for callers that touch several layers (the CLI).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Alarm(#[from] AlarmError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _msg) => {
                if code.code == rusqlite::ErrorCode::DatabaseLocked
                    || code.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for AlarmError {
    fn from(err: rusqlite::Error) -> Self {
        AlarmError::StorageFailure(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
