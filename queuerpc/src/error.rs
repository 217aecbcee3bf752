//! Error types for RPC calls.

use std::time::Duration;

use queuerpc_core::{RemoteError, TransportError};
use thiserror::Error;

/// Errors a call, or a client/server operation, can end with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RpcError {
    /// Nothing was heard from the handler within the call's time-to-live.
    #[error("call to {method} timed out after {ttl:?}")]
    Timeout {
        /// Method that was called.
        method: String,
        /// Window that elapsed without an acknowledgement or reply.
        ttl: Duration,
    },

    /// The target session has no such method.
    #[error("method {method} does not exist")]
    MethodNotFound {
        /// Method that was called.
        method: String,
    },

    /// The handler failed; its error is relayed verbatim.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    /// The client or server was closed before the operation finished.
    #[error("rpc endpoint closed")]
    Closed,

    /// Arguments or result could not be (de)serialized.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The transport rejected a non-retryable operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl RpcError {
    /// Rebuild the caller-side error from an error reply.
    pub fn from_remote(error: RemoteError, called_method: &str) -> Self {
        if error.is_method_not_found() {
            let method = error.method().unwrap_or(called_method).to_string();
            return RpcError::MethodNotFound { method };
        }
        RpcError::Remote(error)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(error: serde_json::Error) -> Self {
        RpcError::Serialization(error.to_string())
    }
}

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;
