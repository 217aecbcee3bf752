//! Capability traits for the underlying session queue.
//!
//! The RPC layer never talks to a concrete broker. It needs exactly this:
//!
//! - a sender bound to no particular session ([`QueueSender`]);
//! - a receiver bound to one session with bounded-wait batch receive
//!   ([`SessionReceiver`]);
//! - per-message settlement through a lock ([`MessageLock`]);
//! - any number of independent sessions addressed by string id.
//!
//! All traits are `?Send`: implementations are driven from a single-threaded
//! runtime and may hold `Rc`/`RefCell` state.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::Envelope;
use crate::error::TransportError;
use crate::types::SessionId;

/// A connection to a session-addressable queue.
///
/// Cloning yields another handle to the same connection.
#[async_trait(?Send)]
pub trait QueueTransport: Clone + 'static {
    /// Outbound handle type.
    type Sender: QueueSender + 'static;

    /// Session receive handle type.
    type Receiver: SessionReceiver + 'static;

    /// Create an outbound handle. Envelopes are routed by their `session_id`.
    fn create_sender(&self) -> Self::Sender;

    /// Create a receive handle bound to `session_id`.
    fn create_receiver(&self, session_id: &SessionId) -> Self::Receiver;

    /// Close the connection. Handles created from it stop working.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Outbound side of the queue.
#[async_trait(?Send)]
pub trait QueueSender {
    /// Hand one envelope to the queue. Resolves once the queue accepted it.
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Release the handle.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Inbound side of the queue, bound to one session.
#[async_trait(?Send)]
pub trait SessionReceiver {
    /// Session this handle reads from.
    fn session_id(&self) -> &SessionId;

    /// Receive up to `max_messages`, waiting at most `max_wait` for the first
    /// one. An empty batch means the wait elapsed.
    async fn receive_messages(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Whether the handle has been closed, locally or by the broker.
    fn is_closed(&self) -> bool;

    /// Close the handle, releasing the session and any unsettled locks.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Settlement of one locked message.
#[async_trait(?Send)]
pub trait MessageLock {
    /// Mark the message processed; it will not be redelivered.
    async fn complete(&self) -> Result<(), TransportError>;

    /// Release the lock; the message becomes available for redelivery.
    async fn abandon(&self) -> Result<(), TransportError>;
}

/// A message delivered under a lock.
#[derive(Clone)]
pub struct ReceivedMessage {
    envelope: Envelope,
    delivery_count: u32,
    lock: Rc<dyn MessageLock>,
}

impl ReceivedMessage {
    /// Wrap a delivered envelope and its lock.
    pub fn new(envelope: Envelope, delivery_count: u32, lock: Rc<dyn MessageLock>) -> Self {
        Self {
            envelope,
            delivery_count,
            lock,
        }
    }

    /// The delivered envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// How many times this message has been delivered, starting at 1.
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// See [`MessageLock::complete`].
    pub async fn complete(&self) -> Result<(), TransportError> {
        self.lock.complete().await
    }

    /// See [`MessageLock::abandon`].
    pub async fn abandon(&self) -> Result<(), TransportError> {
        self.lock.abandon().await
    }
}

impl fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("message_id", &self.envelope.message_id)
            .field("session_id", &self.envelope.session_id)
            .field("body", &self.envelope.body.kind())
            .field("delivery_count", &self.delivery_count)
            .finish()
    }
}
