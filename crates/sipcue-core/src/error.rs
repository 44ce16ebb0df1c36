//! Core error types for sipcue-core.
//!
//! Nothing in the scheduling subsystem is fatal: persistence errors are
//! logged and absorbed by the callers. These types exist so that the store
//! and the registration API can report what went wrong.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for sipcue-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// State store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Scheduler registry errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// State store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Failed to read a state file
    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a state file
    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Data could not be encoded
    #[error("Failed to encode state: {0}")]
    Encode(#[from] serde_json::Error),

    /// Store is unavailable (used by the in-memory store when writes are disabled)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Failed to resolve the data directory
    #[error("Failed to access data directory: {0}")]
    DataDir(String),
}

/// Registration API errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// No timer registered under this name
    #[error("Timer '{0}' is not registered")]
    UnknownTimer(String),

    /// A timer with this name is already registered
    #[error("Timer '{0}' is already registered")]
    DuplicateTimer(String),

    /// Interval must be at least one minute
    #[error("Invalid interval for '{name}': {minutes} minutes (minimum is 1)")]
    InvalidInterval { name: String, minutes: u32 },
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

    /// Unknown dotted key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
