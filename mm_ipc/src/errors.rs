use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to bind socket at {path}: {source}")]
    BindFailed { path: PathBuf, source: std::io::Error },

    #[error("Failed to connect to socket at {path}: {source}")]
    ConnectFailed { path: PathBuf, source: std::io::Error },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message op must not be empty")]
    EmptyOp,

    #[error("Frame too large: {length} bytes pending exceeds maximum of {max}")]
    FrameTooLarge { length: usize, max: usize },

    #[error("Socket not connected")]
    NotConnected,

    #[error("No spoke registered for '{0}'")]
    NoRoute(String),

    #[error("Client has been closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;
