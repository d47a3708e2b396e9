use std::time::Duration;
use thiserror::Error;

/// Errors produced by the gateway core.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("command blocked: {0}")]
    PolicyRejected(String),

    #[error("command timed out after {} seconds", .0.as_secs())]
    ExecutionTimeout(Duration),

    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("unknown session key: {0}")]
    UnknownSessionKey(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session limit reached ({0})")]
    SessionLimit(usize),

    #[error("channel closed")]
    ChannelClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for GateError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        GateError::Transport(e.to_string())
    }
}

pub type GateResult<T> = Result<T, GateError>;
