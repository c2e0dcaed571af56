//! Error types for the agenda sync engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgendaError>;

#[derive(Debug, Error)]
pub enum AgendaError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The backend rejected a booking because the slot is taken (HTTP 409).
    #[error("schedule conflict: {0}")]
    ScheduleConflict(String),

    #[error("failed to decode payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("live channel transport error: {0}")]
    Transport(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AgendaError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}
