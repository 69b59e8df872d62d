//! Error types for latex2gmd.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Tokenization pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to open input {path}: {source}")]
    OpenInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read input line {line}: {source}")]
    ReadInput {
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker pool size must be at least 1")]
    NoWorkers,

    #[error("Failed to spawn {role} thread: {source}")]
    Spawn {
        role: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {worker} panicked")]
    WorkerPanicked { worker: usize },

    #[error("Line source panicked")]
    SourcePanicked,

    #[error("Pipeline lost records: {received} of {expected} collected")]
    Incomplete { expected: usize, received: usize },

    #[error("Duplicate or out-of-range record order {order} (expected {expected})")]
    OrderGap { order: usize, expected: usize },

    #[error("Tokenization cancelled")]
    Cancelled,

    #[error("Blocking task failed: {0}")]
    Join(String),
}

/// Publish/subscribe transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to connect to broker: {0}")]
    Connect(String),

    #[error("Failed to open channel: {0}")]
    Channel(String),

    #[error("Failed to declare queue {queue}: {reason}")]
    Declare { queue: String, reason: String },

    #[error("Failed to consume from queue {queue}: {reason}")]
    Consume { queue: String, reason: String },

    #[error("Failed to publish to {routing_key}: {reason}")]
    Publish { routing_key: String, reason: String },

    #[error("Queue {queue} is exclusive to another connection")]
    ResourceLocked { queue: String },

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Session is closed")]
    Closed,
}

/// RPC client/server errors.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Failed to serialize request: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("Malformed response payload: {0}")]
    MalformedResponse(#[source] serde_json::Error),

    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Call cancelled while awaiting reply")]
    Cancelled,

    #[error("Reply stream closed before a matching reply arrived")]
    ReplyStreamClosed,

    #[error("Request handler failed: {0}")]
    Handler(String),
}

/// Result type alias for latex2gmd.
pub type Result<T> = std::result::Result<T, Error>;
