use std::time::Duration;
use thiserror::Error;

/// Failure of a single node. Never fatal to the run.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Permanent failure; retrying will not help.
    #[error("{0}")]
    Failed(String),

    /// Transient failure (network hiccup, rate limit, 5xx).
    #[error("{0}")]
    Transient(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("expression evaluation failed: {0}")]
    Evaluation(String),

    #[error("executor panicked: {0}")]
    Panicked(String),

    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<NodeError>,
    },

    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    pub fn failed(msg: impl Into<String>) -> Self {
        NodeError::Failed(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        NodeError::Transient(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Transient(_) | NodeError::Timeout(_))
    }
}
