//! Serving side: binds handlers to sessions and answers their calls.
//!
//! ```text
//! Receiver(session) ──Message──► session pump ──spawn_local──► handle_call
//!                                                                 │
//!          method missing:  post(Error{MethodNotFound})  ◄────────┤
//!          otherwise:       post(Acknowledgement)                 │
//!                           invoke(method, args)                  │
//!                           post(Result | Error)                  │
//!                           complete inbound message  ◄───────────┘
//! ```
//!
//! Every call runs on its own local task, so a slow handler never delays
//! the acknowledgement of the next request.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use queuerpc_core::{
    Body, Envelope, QueueSender, QueueTransport, ReceivedMessage, RemoteError, SessionId,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::{forward_warnings, RpcEvents};
use crate::config::ServerConfig;
use crate::error::{RpcError, RpcResult};
use crate::events::{ReceiverEvent, RpcEvent};
use crate::handler::Handler;
use crate::receiver::{Receiver, ReceiverEvents};
use crate::sender::Sender;

/// A served session. The handler lives in the pump task.
struct Session<T: QueueTransport> {
    generation: u64,
    receiver: Receiver<T>,
    pump: JoinHandle<()>,
}

type SessionMap<T> = RefCell<BTreeMap<SessionId, Rc<Session<T>>>>;

/// Serves handlers on any number of sessions over one connection.
///
/// All sessions share one [`Sender`] for their replies. Must be created and
/// used from within a tokio `LocalSet`.
pub struct RpcServer<T: QueueTransport> {
    transport: T,
    config: ServerConfig,
    sender: Sender<T::Sender>,
    sessions: Rc<SessionMap<T>>,
    next_generation: Cell<u64>,
    warning_pump: RefCell<Option<JoinHandle<()>>>,
    events_tx: mpsc::UnboundedSender<RpcEvent>,
    events_rx: RefCell<Option<RpcEvents>>,
    closed: Cell<bool>,
}

impl<T: QueueTransport> RpcServer<T> {
    /// Create a server with no sessions.
    pub fn new(transport: T, config: ServerConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sender = Sender::new(transport.create_sender(), config.sender.clone());
        let warning_pump = sender
            .take_warnings()
            .map(|warnings| tokio::task::spawn_local(forward_warnings(warnings, events_tx.clone())));

        Self {
            transport,
            config,
            sender,
            sessions: Rc::new(RefCell::new(BTreeMap::new())),
            next_generation: Cell::new(0),
            warning_pump: RefCell::new(warning_pump),
            events_tx,
            events_rx: RefCell::new(Some(events_rx)),
            closed: Cell::new(false),
        }
    }

    /// Take the event channel. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<RpcEvents> {
        self.events_rx.borrow_mut().take()
    }

    /// Sessions currently served, sorted.
    pub fn sessions(&self) -> Vec<SessionId> {
        self.sessions.borrow().keys().cloned().collect()
    }

    /// Serve `handler` on `session_id`. No-op if the session is already
    /// served.
    ///
    /// A session whose receive loop ends on its own (the connection was
    /// closed underneath it) is dropped from [`sessions`](Self::sessions).
    pub async fn listen(&self, session_id: SessionId, handler: impl Handler) -> RpcResult<()> {
        if self.closed.get() {
            return Err(RpcError::Closed);
        }
        if self.sessions.borrow().contains_key(&session_id) {
            tracing::debug!(session = %session_id, "already listening");
            return Ok(());
        }

        let receiver = Receiver::new(
            self.transport.clone(),
            session_id.clone(),
            self.config.receiver.clone(),
        );
        let events = receiver.take_events().ok_or(RpcError::Closed)?;
        let handler: Rc<dyn Handler> = Rc::new(handler);
        let generation = self.next_generation.get();
        self.next_generation.set(generation + 1);
        let pump = tokio::task::spawn_local(pump_session(
            events,
            handler,
            self.sender.clone(),
            self.events_tx.clone(),
            SessionSlot {
                sessions: Rc::downgrade(&self.sessions),
                session_id: session_id.clone(),
                generation,
            },
        ));

        let session = Rc::new(Session {
            generation,
            receiver,
            pump,
        });
        self.sessions
            .borrow_mut()
            .insert(session_id.clone(), session.clone());

        tracing::info!(session = %session_id, "listening");
        session.receiver.start().await;
        Ok(())
    }

    /// Stop serving `session_id` and drop its handler. No-op if unknown.
    pub async fn close_session(&self, session_id: &SessionId) {
        let session = self.sessions.borrow_mut().remove(session_id);
        if let Some(session) = session {
            shut_down(session).await;
            tracing::info!(session = %session_id, "session closed");
        }
    }

    /// Close every session concurrently, then the sender and the connection.
    /// Idempotent.
    pub async fn close(&self) -> RpcResult<()> {
        if self.closed.replace(true) {
            return Ok(());
        }

        let sessions: Vec<_> = std::mem::take(&mut *self.sessions.borrow_mut())
            .into_values()
            .collect();
        let count = sessions.len();
        futures::future::join_all(sessions.into_iter().map(shut_down)).await;

        if let Err(e) = self.sender.close().await {
            tracing::warn!(error = %e, "closing reply sender failed");
        }
        if let Some(pump) = self.warning_pump.borrow_mut().take() {
            pump.abort();
        }
        self.transport.close().await?;

        tracing::info!(sessions = count, "rpc server closed");
        let _ = self.events_tx.send(RpcEvent::Closed);
        Ok(())
    }
}

async fn shut_down<T: QueueTransport>(session: Rc<Session<T>>) {
    session.pump.abort();
    session.receiver.stop().await;
}

/// Where a pump's session sits in the server map.
struct SessionSlot<T: QueueTransport> {
    sessions: Weak<SessionMap<T>>,
    session_id: SessionId,
    generation: u64,
}

impl<T: QueueTransport> SessionSlot<T> {
    /// Remove the session unless it was already replaced.
    fn vacate(&self) {
        let Some(sessions) = self.sessions.upgrade() else {
            return;
        };
        let mut sessions = sessions.borrow_mut();
        let current = sessions
            .get(&self.session_id)
            .is_some_and(|session| session.generation == self.generation);
        if current {
            sessions.remove(&self.session_id);
        }
    }
}

async fn pump_session<S: QueueSender + 'static, T: QueueTransport>(
    mut events: ReceiverEvents,
    handler: Rc<dyn Handler>,
    sender: Sender<S>,
    rpc_events: mpsc::UnboundedSender<RpcEvent>,
    slot: SessionSlot<T>,
) {
    while let Some(event) = events.recv().await {
        match event {
            ReceiverEvent::Message(message) => {
                tokio::task::spawn_local(handle_call(message, handler.clone(), sender.clone()));
            }
            ReceiverEvent::Warning(warning) => {
                let _ = rpc_events.send(RpcEvent::Warning(warning));
            }
            ReceiverEvent::Stopped => {
                // Deliberate shutdowns abort the pump first, so this loop
                // ended on its own.
                tracing::warn!(session = %slot.session_id, "receive loop stopped, session no longer served");
                slot.vacate();
                return;
            }
            ReceiverEvent::Started => {}
        }
    }
}

async fn handle_call<S: QueueSender + 'static>(
    message: ReceivedMessage,
    handler: Rc<dyn Handler>,
    sender: Sender<S>,
) {
    let request = message.envelope();

    match &request.body {
        Body::Request { method, args } => {
            if request.reply_to.is_none() {
                tracing::warn!(
                    session = %request.session_id,
                    message_id = %request.message_id,
                    method = %method,
                    "request has no replyTo, replies cannot be routed"
                );
            }

            if handler.has_method(method) {
                reply(&sender, request, Body::acknowledgement());
                let body = match handler.invoke(method, args.clone()).await {
                    Ok(result) => Body::Result { result },
                    Err(error) => {
                        tracing::debug!(
                            session = %request.session_id,
                            method = %method,
                            error = %error,
                            "handler returned an error"
                        );
                        Body::Error { error }
                    }
                };
                reply(&sender, request, body);
            } else {
                tracing::debug!(session = %request.session_id, method = %method, "method not found");
                reply(
                    &sender,
                    request,
                    Body::Error {
                        error: RemoteError::method_not_found(method),
                    },
                );
            }
        }
        other => {
            tracing::warn!(
                session = %request.session_id,
                message_id = %request.message_id,
                body = other.kind(),
                "unexpected message on handler session"
            );
        }
    }

    if let Err(e) = message.complete().await {
        tracing::warn!(
            session = %request.session_id,
            message_id = %request.message_id,
            error = %e,
            "completing request failed"
        );
    }
}

fn reply<S: QueueSender + 'static>(sender: &Sender<S>, request: &Envelope, body: Body) {
    if let Some(envelope) = request.reply(body) {
        sender.post(envelope);
    }
}
