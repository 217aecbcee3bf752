//! Typed events emitted by receivers, clients and servers.
//!
//! Events are delivered on unbounded `mpsc` channels. Each component hands
//! out its receiving half once through `take_events()`; after that, events
//! are dropped if nobody listens.

use std::fmt;
use std::time::Duration;

use queuerpc_core::{ReceivedMessage, SessionId, TransportError};

/// What went wrong in a recoverable transport operation.
#[derive(Debug, Clone, PartialEq)]
pub enum WarningKind {
    /// A send failed and will be retried after the cooldown.
    SendFailed(TransportError),

    /// A receive failed; the loop backs off or recreates the handle.
    ReceiveFailed(TransportError),

    /// A receive did not return within `idle_timeout + overrun_grace`.
    ReceiveOverrun {
        /// How long the receive had been pending.
        waited: Duration,
    },
}

/// A recoverable failure. Never fatal, surfaced for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    /// Session the warning originated from, when there is one.
    pub session_id: Option<SessionId>,

    /// What happened.
    pub kind: WarningKind,
}

impl Warning {
    /// Warning tagged with a session.
    pub fn for_session(session_id: &SessionId, kind: WarningKind) -> Self {
        Self {
            session_id: Some(session_id.clone()),
            kind,
        }
    }

    /// Warning not tied to a session.
    pub fn unscoped(kind: WarningKind) -> Self {
        Self {
            session_id: None,
            kind,
        }
    }

    /// Whether this is a receive overrun.
    pub fn is_overrun(&self) -> bool {
        matches!(self.kind, WarningKind::ReceiveOverrun { .. })
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(session_id) = &self.session_id {
            write!(f, "[{session_id}] ")?;
        }
        match &self.kind {
            WarningKind::SendFailed(e) => write!(f, "send failed: {e}"),
            WarningKind::ReceiveFailed(e) => write!(f, "receive failed: {e}"),
            WarningKind::ReceiveOverrun { waited } => {
                write!(f, "receive overrun after {waited:?}")
            }
        }
    }
}

/// Events emitted by a [`Receiver`](crate::Receiver).
#[derive(Debug)]
pub enum ReceiverEvent {
    /// The receive loop started.
    Started,

    /// A message arrived. The consumer must settle it.
    Message(ReceivedMessage),

    /// A recoverable failure.
    Warning(Warning),

    /// The receive loop exited.
    Stopped,
}

/// Events emitted by [`RpcClient`](crate::RpcClient) and
/// [`RpcServer`](crate::RpcServer).
#[derive(Debug, Clone, PartialEq)]
pub enum RpcEvent {
    /// A recoverable failure in a sender or receiver.
    Warning(Warning),

    /// The endpoint was closed.
    Closed,
}
