use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Failure classes shared by the registry, allocator, rule manager and orchestrator.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),
    /// Agent RPC failed, timed out, or a local subprocess (easyrsa, iptables) failed.
    #[error("Remote failure: {0}")]
    RemoteFailure(String),
    #[error("Conflict: {0}")]
    ConflictRace(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        FleetError::NotFound(what.to_string())
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FleetError::RemoteFailure(format!("agent request timed out, remote outcome unknown: {err}"))
        } else {
            FleetError::RemoteFailure(format!("agent request failed: {err}"))
        }
    }
}

/// True when the store rejected a write because of a unique index.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
