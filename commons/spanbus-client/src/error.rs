use std::time::Duration;

/// Errors surfaced by broker client implementations.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("producer queue is full")]
    QueueFull,
    #[error("client is closed")]
    Closed,
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
    #[error("unknown partition {1} for topic {0}")]
    UnknownPartition(String, i32),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from header collection operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("offset {0} out of range for {1} header entries")]
    OffsetOutOfRange(usize, usize),
}
