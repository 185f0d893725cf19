use crate::domain::timer::TimerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Write conflict: {0}")]
    Conflict(String),
    #[error("Username already taken: {0}")]
    UsernameTaken(String),
    #[error("{0}")]
    Validation(String),
    #[error("Sign in required")]
    Unauthenticated,
    #[error(transparent)]
    Timer(#[from] TimerError),
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}
