//! The wire unit exchanged over the queue.
//!
//! ```text
//! caller                              handler session
//!   │  Request {method, args}  ──────────►  │
//!   │  ◄──────────  Acknowledgement         │  (refreshes caller timeout)
//!   │  ◄──────────  Result | Error          │  (settles the call)
//! ```
//!
//! Requests are correlated by their `messageId`; every reply carries that id
//! in `correlationId` and is routed to the request's `replyTo` session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::remote_error::RemoteError;
use crate::types::{MessageId, SessionId};

/// Transport expiry hint attached to replies.
pub const REPLY_TIME_TO_LIVE: Duration = Duration::from_secs(60);

/// Payload of an envelope. Exactly one shape per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    /// Invoke `method` with `args`.
    Request {
        /// Method name on the target handler.
        method: String,
        /// Arguments, passed to the method as-is.
        #[serde(default)]
        args: Value,
    },

    /// The handler has started working on the call.
    Acknowledgement {
        /// Always `true` when produced by this crate.
        acknowledgement: bool,
    },

    /// The handler failed.
    Error {
        /// Structured error relayed to the caller.
        error: RemoteError,
    },

    /// The handler returned a value.
    Result {
        /// Returned value.
        result: Value,
    },
}

impl Body {
    /// An acknowledgement body.
    pub fn acknowledgement() -> Self {
        Body::Acknowledgement {
            acknowledgement: true,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Request { .. } => "request",
            Body::Acknowledgement { .. } => "acknowledgement",
            Body::Error { .. } => "error",
            Body::Result { .. } => "result",
        }
    }
}

/// A message on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique id of this message.
    pub message_id: MessageId,

    /// Payload.
    pub body: Body,

    /// Session that must receive this message.
    pub session_id: SessionId,

    /// Session replies are routed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<SessionId>,

    /// For replies, the `message_id` of the request being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<MessageId>,

    /// Transport expiry hint in milliseconds.
    pub time_to_live: u64,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(
        message_id: MessageId,
        session_id: SessionId,
        method: impl Into<String>,
        args: Value,
        reply_to: Option<SessionId>,
        ttl: Duration,
    ) -> Self {
        Self {
            message_id,
            body: Body::Request {
                method: method.into(),
                args,
            },
            session_id,
            reply_to,
            correlation_id: None,
            time_to_live: duration_to_millis(ttl),
        }
    }

    /// Build a reply to this envelope carrying `body`.
    ///
    /// Returns `None` when the request named no reply session.
    pub fn reply(&self, body: Body) -> Option<Envelope> {
        let session_id = self.reply_to.clone()?;
        Some(Envelope {
            message_id: MessageId::random(),
            body,
            session_id,
            reply_to: None,
            correlation_id: Some(self.message_id.clone()),
            time_to_live: duration_to_millis(REPLY_TIME_TO_LIVE),
        })
    }

    /// The transport expiry hint as a duration.
    pub fn time_to_live(&self) -> Duration {
        Duration::from_millis(self.time_to_live)
    }

    /// Method name if this is a request.
    pub fn method(&self) -> Option<&str> {
        match &self.body {
            Body::Request { method, .. } => Some(method),
            _ => None,
        }
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
