//! Connection, sender, receiver and lock handles over a [`MemoryQueue`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use queuerpc_core::{
    Envelope, MessageCodec, MessageId, MessageLock, QueueSender, QueueTransport, ReceivedMessage,
    SessionId, SessionReceiver, TransportError,
};
use tokio::time::Instant;

use crate::broker::{BrokerState, MemoryQueue};

/// One connection to a [`MemoryQueue`].
///
/// Closing a connection fails every handle created from it but leaves the
/// broker and other connections untouched.
#[derive(Clone)]
pub struct MemoryConnection {
    queue: MemoryQueue,
    closed: Rc<Cell<bool>>,
}

impl MemoryConnection {
    pub(crate) fn new(queue: MemoryQueue) -> Self {
        Self {
            queue,
            closed: Rc::new(Cell::new(false)),
        }
    }

    /// Whether [`close`](QueueTransport::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// The broker behind this connection.
    pub fn queue(&self) -> &MemoryQueue {
        &self.queue
    }
}

#[async_trait(?Send)]
impl QueueTransport for MemoryConnection {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    fn create_sender(&self) -> MemorySender {
        MemorySender {
            queue: self.queue.clone(),
            connection_closed: self.closed.clone(),
            closed: Cell::new(false),
        }
    }

    fn create_receiver(&self, session_id: &SessionId) -> MemoryReceiver {
        let token = self.queue.state().borrow_mut().next_token();
        MemoryReceiver {
            queue: self.queue.clone(),
            session_id: session_id.clone(),
            token,
            connection_closed: self.closed.clone(),
            closed: Cell::new(false),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed.replace(true) {
            tracing::debug!("memory connection closed");
            self.queue.state().borrow().wake_all();
        }
        Ok(())
    }
}

/// Outbound handle. Routes each envelope by its `session_id`.
pub struct MemorySender {
    queue: MemoryQueue,
    connection_closed: Rc<Cell<bool>>,
    closed: Cell<bool>,
}

#[async_trait(?Send)]
impl QueueSender for MemorySender {
    async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        if self.closed.get() || self.connection_closed.get() {
            return Err(TransportError::ConnectionClosed);
        }
        self.queue.accept(envelope)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.set(true);
        Ok(())
    }
}

/// Receive handle bound to one session.
///
/// The first receive claims the session. While the handle is open no other
/// receiver can read from that session. Closing or dropping the handle
/// returns its unsettled messages to the head of the session queue.
pub struct MemoryReceiver {
    queue: MemoryQueue,
    session_id: SessionId,
    token: u64,
    connection_closed: Rc<Cell<bool>>,
    closed: Cell<bool>,
}

enum InjectedFault {
    Fail,
    Stall,
    Close,
}

impl MemoryReceiver {
    fn check_open(&self) -> Result<(), TransportError> {
        if self.connection_closed.get() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.closed.get() {
            return Err(TransportError::ReceiverClosed {
                session_id: self.session_id.to_string(),
            });
        }
        Ok(())
    }

    fn next_fault(&self) -> Option<InjectedFault> {
        let mut state = self.queue.state().borrow_mut();
        let faults = &mut state.faults;
        if faults.fail_receives > 0 {
            faults.fail_receives -= 1;
            Some(InjectedFault::Fail)
        } else if faults.close_receives > 0 {
            faults.close_receives -= 1;
            Some(InjectedFault::Close)
        } else if faults.stall_receives > 0 {
            faults.stall_receives -= 1;
            Some(InjectedFault::Stall)
        } else {
            None
        }
    }

    fn shutdown(&self) {
        if self.closed.replace(true) {
            return;
        }
        match self.queue.state().try_borrow_mut() {
            Ok(mut state) => state.release(&self.session_id, self.token),
            Err(_) => tracing::warn!(
                session = %self.session_id,
                "broker busy while releasing receiver"
            ),
        }
    }

    fn lock_for(&self, lock_token: u64, message_id: MessageId) -> Rc<dyn MessageLock> {
        Rc::new(MemoryLock {
            state: Rc::downgrade(self.queue.state()),
            session_id: self.session_id.clone(),
            lock_token,
            message_id,
        })
    }

    /// Claim the session and lock whatever is ready, decoding as we go.
    fn try_take(&self, max_messages: usize) -> Result<Vec<ReceivedMessage>, TransportError> {
        let mut state = self.queue.state().borrow_mut();
        state.claim(&self.session_id, self.token)?;

        let deliveries = state.take_ready(&self.session_id, self.token, max_messages, Instant::now());
        let mut messages = Vec::with_capacity(deliveries.len());
        for delivery in deliveries {
            match self.queue.codec().decode::<Envelope>(&delivery.bytes) {
                Ok(envelope) => messages.push(ReceivedMessage::new(
                    envelope,
                    delivery.delivery_count,
                    self.lock_for(delivery.lock_token, delivery.message_id),
                )),
                Err(e) => {
                    tracing::warn!(
                        session = %self.session_id,
                        message_id = %delivery.message_id,
                        error = %e,
                        "discarding undecodable message"
                    );
                    let _ = state.complete(&self.session_id, delivery.lock_token, &delivery.message_id);
                }
            }
        }
        Ok(messages)
    }
}

#[async_trait(?Send)]
impl SessionReceiver for MemoryReceiver {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    async fn receive_messages(
        &self,
        max_messages: usize,
        max_wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, TransportError> {
        let deadline = Instant::now() + max_wait;
        self.check_open()?;

        match self.next_fault() {
            Some(InjectedFault::Fail) => {
                return Err(TransportError::ReceiveFailed {
                    message: "injected receive failure".to_string(),
                });
            }
            Some(InjectedFault::Close) => {
                tracing::debug!(session = %self.session_id, "injected receiver close");
                self.shutdown();
                return Err(TransportError::ReceiverClosed {
                    session_id: self.session_id.to_string(),
                });
            }
            Some(InjectedFault::Stall) => {
                tracing::debug!(session = %self.session_id, "injected receive stall");
                std::future::pending::<()>().await;
            }
            None => {}
        }

        let max_messages = max_messages.max(1);
        loop {
            self.check_open()?;

            let notify = self.queue.state().borrow_mut().notify_handle(&self.session_id);
            let notified = notify.notified();
            tokio::pin!(notified);
            // Register before looking so an enqueue between the check and
            // the await is not missed.
            notified.as_mut().enable();

            let messages = self.try_take(max_messages)?;
            if !messages.is_empty() {
                return Ok(messages);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.get() || self.connection_closed.get()
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown();
        Ok(())
    }
}

impl Drop for MemoryReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Settlement handle for one delivered message.
struct MemoryLock {
    state: Weak<RefCell<BrokerState>>,
    session_id: SessionId,
    lock_token: u64,
    message_id: MessageId,
}

impl MemoryLock {
    fn lost(&self) -> TransportError {
        TransportError::LockLost {
            message_id: self.message_id.to_string(),
        }
    }
}

#[async_trait(?Send)]
impl MessageLock for MemoryLock {
    async fn complete(&self) -> Result<(), TransportError> {
        let state = self.state.upgrade().ok_or_else(|| self.lost())?;
        let result = state
            .borrow_mut()
            .complete(&self.session_id, self.lock_token, &self.message_id);
        result
    }

    async fn abandon(&self) -> Result<(), TransportError> {
        let state = self.state.upgrade().ok_or_else(|| self.lost())?;
        let result = state
            .borrow_mut()
            .abandon(&self.session_id, self.lock_token, &self.message_id);
        result
    }
}
