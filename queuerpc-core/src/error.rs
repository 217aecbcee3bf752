//! Errors reported by queue transports.

use thiserror::Error;

use crate::codec::CodecError;

/// Errors that can occur while talking to the queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection was closed locally; nothing more can be sent or received.
    #[error("connection closed")]
    ConnectionClosed,

    /// The session receive handle is closed and must be recreated.
    #[error("receiver for session {session_id} is closed")]
    ReceiverClosed {
        /// Session the handle was bound to.
        session_id: String,
    },

    /// Another receiver currently holds the session.
    #[error("session {session_id} is locked by another receiver")]
    SessionLocked {
        /// Contended session.
        session_id: String,
    },

    /// The lock on a received message is no longer held.
    #[error("lock lost for message {message_id}")]
    LockLost {
        /// Message whose lock was lost.
        message_id: String,
    },

    /// Sending a message failed.
    #[error("send failed: {message}")]
    SendFailed {
        /// Provider detail.
        message: String,
    },

    /// Receiving from a session failed.
    #[error("receive failed: {message}")]
    ReceiveFailed {
        /// Provider detail.
        message: String,
    },

    /// An envelope could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Codec detail.
        message: String,
    },
}

impl TransportError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionClosed => false,
            Self::ReceiverClosed { .. } => true,
            Self::SessionLocked { .. } => true,
            Self::LockLost { .. } => false,
            Self::SendFailed { .. } => true,
            Self::ReceiveFailed { .. } => true,
            Self::Codec { .. } => false,
        }
    }
}

impl From<CodecError> for TransportError {
    fn from(err: CodecError) -> Self {
        TransportError::Codec {
            message: err.to_string(),
        }
    }
}
