//! Error types for backup and restore operations.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid options: {0}")]
    Validation(String),

    #[error("Insufficient disk space: need {needed}, only {available} available")]
    InsufficientSpace { needed: String, available: String },

    #[error("Dump failed{}: {message}", .exit_code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    Dump {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("Storage error during {op} on {}: {source}", .path.display())]
    Storage {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid metadata in {}: {message}", .path.display())]
    Metadata { path: PathBuf, message: String },

    #[error("Metadata file not found: {}", .0.display())]
    MetadataNotFound(PathBuf),

    #[error("Backup not found for database '{database}'{}", .backup_id.as_ref().map(|id| format!(": {id}")).unwrap_or_default())]
    BackupNotFound {
        database: String,
        backup_id: Option<String>,
    },

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("A backup of database '{0}' is already in progress")]
    BackupInProgress(String),

    #[error("Restore failed: {0}")]
    Restore(String),

    #[error("Database query failed: {0}")]
    Source(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
