//! Queue error types.

use thiserror::Error;

/// Errors that can occur talking to a queue service.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Every candidate request shape was rejected with a client error
    #[error("{operation} rejected: {status} {body}")]
    Rejected {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Server answered with a status that is not retried with another shape
    #[error("{operation} failed: {status} {body}")]
    Server {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// Connection, timeout or stream read failure
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A response or message could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A delivery carries neither a lease id nor an owner/partition/offset
    #[error("Delivery has no identity")]
    MissingIdentity,

    /// Topic does not exist
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),
}

impl QueueError {
    /// True for faults of the connection itself rather than of a request.
    pub fn is_transport(&self) -> bool {
        matches!(self, QueueError::Transport(_))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Decode(err.to_string())
    }
}
