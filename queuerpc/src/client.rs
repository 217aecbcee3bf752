//! Calling side: call registry and [`RpcClient`].
//!
//! ```text
//! call() ──register(id, ttl)──► CallRegistry ◄──── reply pump ◄── Receiver(client session)
//!    │                          │  id → PendingCall       acknowledgement → re-arm timer
//!    └──Sender.post(request)    │  timer per call         result / error  → take + resolve
//!                               └─ timer fires → remove, Timeout
//! ```
//!
//! A call is removed from the registry on every settlement path. Replies that
//! find no entry (duplicates, late arrivals after a timeout) are completed
//! on the transport and otherwise ignored.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use queuerpc_core::{Body, Envelope, MessageId, QueueTransport, ReceivedMessage, SessionId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::{CallOptions, ClientConfig};
use crate::error::{RpcError, RpcResult};
use crate::events::{ReceiverEvent, RpcEvent};
use crate::receiver::{Receiver, ReceiverEvents};
use crate::sender::{Sender, WarningReceiver};

/// Event channel handed out by `take_events()` on clients and servers.
pub type RpcEvents = mpsc::UnboundedReceiver<RpcEvent>;

struct PendingCall {
    method: String,
    ttl: Duration,
    completion: oneshot::Sender<RpcResult<Value>>,
    timer: Option<JoinHandle<()>>,
}

impl PendingCall {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Outstanding calls keyed by request message id.
#[derive(Default)]
pub(crate) struct CallRegistry {
    calls: RefCell<HashMap<MessageId, PendingCall>>,
}

impl CallRegistry {
    /// Track a new call and arm its timer.
    pub(crate) fn register(
        self: &Rc<Self>,
        id: MessageId,
        method: &str,
        ttl: Duration,
    ) -> oneshot::Receiver<RpcResult<Value>> {
        let (completion, reply) = oneshot::channel();
        let timer = self.arm_timer(id.clone(), ttl);
        let previous = self.calls.borrow_mut().insert(
            id,
            PendingCall {
                method: method.to_string(),
                ttl,
                completion,
                timer: Some(timer),
            },
        );
        if let Some(mut previous) = previous {
            previous.cancel_timer();
        }
        reply
    }

    fn arm_timer(self: &Rc<Self>, id: MessageId, ttl: Duration) -> JoinHandle<()> {
        let registry = Rc::downgrade(self);
        tokio::task::spawn_local(async move {
            tokio::time::sleep(ttl).await;
            if let Some(registry) = registry.upgrade() {
                registry.expire(&id);
            }
        })
    }

    /// The handler started work: give the call a fresh ttl window.
    pub(crate) fn acknowledge(self: &Rc<Self>, id: &MessageId) -> bool {
        let ttl = match self.calls.borrow_mut().get_mut(id) {
            Some(call) => {
                call.cancel_timer();
                call.ttl
            }
            None => return false,
        };
        let timer = self.arm_timer(id.clone(), ttl);
        match self.calls.borrow_mut().get_mut(id) {
            Some(call) => call.timer = Some(timer),
            None => timer.abort(),
        }
        true
    }

    /// Remove a call and cancel its timer.
    fn take(&self, id: &MessageId) -> Option<PendingCall> {
        let mut call = self.calls.borrow_mut().remove(id)?;
        call.cancel_timer();
        Some(call)
    }

    /// Resolve a call from a result or error body. Returns `false` if no call
    /// is waiting under `id`.
    pub(crate) fn settle(&self, id: &MessageId, body: Body) -> bool {
        let reply = match body {
            Body::Result { result } => Ok(result),
            Body::Error { error } => Err(error),
            other => {
                tracing::warn!(message_id = %id, body = other.kind(), "cannot settle call with this body");
                return false;
            }
        };
        let Some(call) = self.take(id) else {
            return false;
        };
        let outcome = reply.map_err(|error| RpcError::from_remote(error, &call.method));
        let _ = call.completion.send(outcome);
        true
    }

    fn expire(&self, id: &MessageId) {
        // Runs on the timer task itself: drop the handle without aborting.
        let Some(call) = self.calls.borrow_mut().remove(id) else {
            return;
        };
        tracing::debug!(message_id = %id, method = %call.method, ttl = ?call.ttl, "call timed out");
        let _ = call.completion.send(Err(RpcError::Timeout {
            method: call.method,
            ttl: call.ttl,
        }));
    }

    /// Reject every outstanding call with `error`.
    pub(crate) fn fail_all(&self, error: RpcError) {
        let calls: Vec<_> = self.calls.borrow_mut().drain().collect();
        for (_, mut call) in calls {
            call.cancel_timer();
            let _ = call.completion.send(Err(error.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.borrow().len()
    }
}

/// Calls methods on remote sessions and waits for their replies.
///
/// The client owns its transport connection, one reply session with a
/// [`Receiver`] bound to it, and one [`Sender`]. Must be used from within a
/// tokio `LocalSet`.
///
/// # Example
///
/// ```rust,no_run
/// use queuerpc::{CallOptions, ClientConfig, RpcClient};
/// use queuerpc_core::SessionId;
/// use queuerpc_memory::MemoryQueue;
///
/// # async fn run() -> Result<(), queuerpc::RpcError> {
/// let queue = MemoryQueue::new();
/// let client = RpcClient::connect(queue.connect(), ClientConfig::default()).await?;
/// let target = SessionId::new("calc").expect("valid session id");
/// let product: i64 = client
///     .call(&target, "mul", serde_json::json!({"a": 5, "b": 3}), CallOptions::default())
///     .await?;
/// assert_eq!(product, 15);
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct RpcClient<T: QueueTransport> {
    transport: T,
    session_id: SessionId,
    sender: Sender<T::Sender>,
    receiver: Receiver<T>,
    registry: Rc<CallRegistry>,
    pumps: RefCell<Vec<JoinHandle<()>>>,
    events_tx: mpsc::UnboundedSender<RpcEvent>,
    events_rx: RefCell<Option<RpcEvents>>,
    closed: Cell<bool>,
}

impl<T: QueueTransport> RpcClient<T> {
    /// Connect with a fresh random reply session.
    pub async fn connect(transport: T, config: ClientConfig) -> RpcResult<Self> {
        Self::connect_as(transport, SessionId::random(), config).await
    }

    /// Connect using `session_id` as the reply session.
    pub async fn connect_as(
        transport: T,
        session_id: SessionId,
        config: ClientConfig,
    ) -> RpcResult<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sender = Sender::new(transport.create_sender(), config.sender);
        let receiver = Receiver::new(transport.clone(), session_id.clone(), config.receiver);
        let registry = Rc::new(CallRegistry::default());

        let mut pumps = Vec::with_capacity(2);
        if let Some(replies) = receiver.take_events() {
            pumps.push(tokio::task::spawn_local(pump_replies(
                replies,
                Rc::downgrade(&registry),
                events_tx.clone(),
            )));
        }
        if let Some(warnings) = sender.take_warnings() {
            pumps.push(tokio::task::spawn_local(forward_warnings(
                warnings,
                events_tx.clone(),
            )));
        }

        receiver.start().await;
        tracing::debug!(session = %session_id, "rpc client connected");

        Ok(Self {
            transport,
            session_id,
            sender,
            receiver,
            registry,
            pumps: RefCell::new(pumps),
            events_tx,
            events_rx: RefCell::new(Some(events_rx)),
            closed: Cell::new(false),
        })
    }

    /// The reply session of this client.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.registry.len()
    }

    /// Take the event channel. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<RpcEvents> {
        self.events_rx.borrow_mut().take()
    }

    /// Call `method` on session `target` and decode its result.
    ///
    /// Transport failures are retried internally; the call only ends with
    /// a reply, a timeout or [`close`](Self::close).
    pub async fn call<A, R>(
        &self,
        target: &SessionId,
        method: &str,
        args: A,
        options: CallOptions,
    ) -> RpcResult<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        if self.closed.get() {
            return Err(RpcError::Closed);
        }

        let args = serde_json::to_value(args)?;
        let id = MessageId::random();
        let request = Envelope::request(
            id.clone(),
            target.clone(),
            method,
            args,
            Some(self.session_id.clone()),
            options.ttl,
        );

        let reply = self.registry.register(id.clone(), method, options.ttl);
        tracing::debug!(
            callee = %target,
            method,
            message_id = %id,
            ttl = ?options.ttl,
            "calling"
        );
        self.sender.post(request);

        let value = reply.await.unwrap_or(Err(RpcError::Closed))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Stop receiving, reject outstanding calls with [`RpcError::Closed`],
    /// close the sender and the connection. Idempotent.
    pub async fn close(&self) -> RpcResult<()> {
        if self.closed.replace(true) {
            return Ok(());
        }

        self.receiver.stop().await;
        for pump in self.pumps.borrow_mut().drain(..) {
            pump.abort();
        }
        let outstanding = self.registry.len();
        self.registry.fail_all(RpcError::Closed);
        if let Err(e) = self.sender.close().await {
            tracing::warn!(session = %self.session_id, error = %e, "closing sender failed");
        }
        self.transport.close().await?;

        tracing::debug!(session = %self.session_id, outstanding, "rpc client closed");
        let _ = self.events_tx.send(RpcEvent::Closed);
        Ok(())
    }
}

async fn pump_replies(
    mut replies: ReceiverEvents,
    registry: Weak<CallRegistry>,
    events: mpsc::UnboundedSender<RpcEvent>,
) {
    while let Some(event) = replies.recv().await {
        match event {
            ReceiverEvent::Message(message) => {
                if let Some(registry) = registry.upgrade() {
                    dispatch_reply(&registry, &message);
                }
                if let Err(e) = message.complete().await {
                    tracing::debug!(
                        message_id = %message.envelope().message_id,
                        error = %e,
                        "completing reply failed"
                    );
                }
            }
            ReceiverEvent::Warning(warning) => {
                let _ = events.send(RpcEvent::Warning(warning));
            }
            ReceiverEvent::Started | ReceiverEvent::Stopped => {}
        }
    }
}

fn dispatch_reply(registry: &Rc<CallRegistry>, message: &ReceivedMessage) {
    let envelope = message.envelope();
    let Some(id) = &envelope.correlation_id else {
        tracing::warn!(
            message_id = %envelope.message_id,
            body = envelope.body.kind(),
            "message without correlation id on reply session"
        );
        return;
    };

    let matched = match &envelope.body {
        Body::Acknowledgement { .. } => registry.acknowledge(id),
        Body::Request { method, .. } => {
            tracing::warn!(message_id = %envelope.message_id, method = %method, "request on reply session");
            return;
        }
        body => registry.settle(id, body.clone()),
    };

    if !matched {
        tracing::debug!(
            correlation_id = %id,
            body = envelope.body.kind(),
            "ignoring reply for unknown call"
        );
    }
}

pub(crate) async fn forward_warnings(
    mut warnings: WarningReceiver,
    events: mpsc::UnboundedSender<RpcEvent>,
) {
    while let Some(warning) = warnings.recv().await {
        let _ = events.send(RpcEvent::Warning(warning));
    }
}
