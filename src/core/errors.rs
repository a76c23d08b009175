// src/core/errors.rs

//! Defines the primary error type for the HA manager.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the HA manager.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
///
/// Partitions failures into two tiers the tick loop can match on directly:
/// `Offline` (retry next tick) and `Fatal` (terminal).
#[derive(Error, Debug)]
pub enum HaError {
    /// The database connection is down or a query timed out. Retryable on the next tick.
    #[error("registry offline: {0}")]
    Offline(String),

    /// An unrecoverable condition: admission violation, session takeover, or a
    /// committed-state violation reported by the registry store. Short-circuits the
    /// tick and is surfaced to the parent as a terminal `status=error`.
    #[error("{0}")]
    Fatal(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("malformed IPC frame: {0}")]
    Protocol(String),

    #[error("JSON encoding error: {0}")]
    Json(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Clone for HaError {
    fn clone(&self) -> Self {
        match self {
            HaError::Offline(s) => HaError::Offline(s.clone()),
            HaError::Fatal(s) => HaError::Fatal(s.clone()),
            HaError::Io(e) => HaError::Io(Arc::clone(e)),
            HaError::Protocol(s) => HaError::Protocol(s.clone()),
            HaError::Json(s) => HaError::Json(s.clone()),
            HaError::Config(s) => HaError::Config(s.clone()),
        }
    }
}

impl HaError {
    /// True for the retryable tier (`offline`); false for anything that should
    /// abort the current tick and terminate the manager.
    pub fn is_offline(&self) -> bool {
        matches!(self, HaError::Offline(_))
    }
}

impl From<std::io::Error> for HaError {
    fn from(e: std::io::Error) -> Self {
        HaError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for HaError {
    fn from(e: serde_json::Error) -> Self {
        HaError::Json(e.to_string())
    }
}

impl From<toml::de::Error> for HaError {
    fn from(e: toml::de::Error) -> Self {
        HaError::Config(e.to_string())
    }
}

impl From<sqlx::Error> for HaError {
    fn from(e: sqlx::Error) -> Self {
        // A dropped pool connection or a transient network error is retryable;
        // anything else (bad SQL, constraint violation) is fatal.
        match &e {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
                HaError::Offline(e.to_string())
            }
            _ => HaError::Fatal(e.to_string()),
        }
    }
}
