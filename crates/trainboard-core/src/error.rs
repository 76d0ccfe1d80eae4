//! Error types for trainboard-core.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid duration buckets: {0}")]
    InvalidBuckets(String),

    #[error("Job source not found: {0}")]
    SourceNotFound(String),

    #[error("Training not found: {0}")]
    TrainingNotFound(String),

    #[error("Follower channel closed")]
    ChannelClosed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, DashError>;
