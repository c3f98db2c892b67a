use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("path escapes agent root: {}", .0.display())]
    PathTraversal(PathBuf),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("datastore error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
