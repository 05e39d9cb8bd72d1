use thiserror::Error;

use crate::pty::PtyError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session limit reached ({max} concurrent sessions)")]
    CapacityExceeded { max: usize },

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("failed to start process: {0}")]
    Spawn(#[source] PtyError),

    #[error("process error: {0}")]
    Process(#[source] PtyError),

    #[error("invalid session id: {0}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
