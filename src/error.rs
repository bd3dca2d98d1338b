//! Error types for packflow.

use thiserror::Error;

use crate::model::action::State;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: State, to: State },

    /// The backing store is unreachable or is not honoring the
    /// compare-and-swap contract. Fatal for the current call.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Error::StoreUnavailable(format!("migration failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
