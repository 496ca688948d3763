//! Error types for the controller.
//!
//! Each variant maps to one failure class of a reconcile pass; classification
//! decides how soon the instance is requeued.

use std::time::Duration;
use thiserror::Error;

use crate::client::NodeError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object store failure outside a direct API call (listing, decoding)
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// A node selected as a heal target could not be reached
    #[error("Node unreachable: {0}")]
    NodeUnreachable(NodeError),

    /// A node answered but refused a command or query
    #[error("Command rejected: {0}")]
    ProtocolRejected(NodeError),

    /// Writing the status subresource failed after healing
    #[error("Status write failed: {0}")]
    StatusWrite(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<NodeError> for Error {
    fn from(err: NodeError) -> Self {
        if err.is_unreachable() {
            Error::NodeUnreachable(err)
        } else {
            Error::ProtocolRejected(err)
        }
    }
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried soon
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::ObjectStore(_) | Error::NodeUnreachable(_) | Error::StatusWrite(_) => true,
            Error::Validation(_) | Error::MissingField(_) | Error::ProtocolRejected(_) => false,
            Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(10)
        } else {
            Duration::from_secs(60)
        }
    }

    /// Short machine-readable reason, used for events.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube(_) | Error::ObjectStore(_) => "ObjectStoreFailed",
            Error::MissingField(_) | Error::Validation(_) => "ValidationFailed",
            Error::NodeUnreachable(_) => "NodeUnreachable",
            Error::ProtocolRejected(_) => "CommandRejected",
            Error::StatusWrite(_) => "StatusWriteFailed",
            Error::Serialization(_) => "SerializationFailed",
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
