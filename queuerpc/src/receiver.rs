//! Recoverable receive loop bound to one session.
//!
//! ```text
//!            start()                         stop()
//!   idle ───────────────► running ───────────────────► idle
//!          emit Started      │   abort signal, await loop,
//!          spawn loop        │   emit Stopped (from the loop)
//!          settle_delay      │   settle_delay
//!                            ▼
//!   loop: select! {
//!       abort                          → close handle, exit
//!       receive(max, idle_timeout)     → emit Message*, reset backoff
//!       sleep(idle_timeout + grace)    → overrun: recreate handle, continue
//!   }
//!   errors: handle closed → recreate, back off
//!           connection closed → exit
//!           anything else → back off (abortable)
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use queuerpc_core::{QueueTransport, SessionId, SessionReceiver, TransportError};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::backoff::FibonacciBackoff;
use crate::config::ReceiverConfig;
use crate::events::{ReceiverEvent, Warning, WarningKind};

/// Event channel handed out by [`Receiver::take_events`].
pub type ReceiverEvents = mpsc::UnboundedReceiver<ReceiverEvent>;

/// State owned by the loop task. Holds no abort sender: dropping the
/// [`Receiver`] drops the sender and ends the loop.
struct LoopContext<T: QueueTransport> {
    transport: T,
    session_id: SessionId,
    config: ReceiverConfig,
    running: Rc<Cell<bool>>,
    events: mpsc::UnboundedSender<ReceiverEvent>,
}

impl<T: QueueTransport> LoopContext<T> {
    fn emit(&self, event: ReceiverEvent) {
        let _ = self.events.send(event);
    }

    fn warn(&self, kind: WarningKind) {
        self.emit(ReceiverEvent::Warning(Warning::for_session(
            &self.session_id,
            kind,
        )));
    }
}

/// Session receiver with a `start()`/`stop()` lifecycle.
///
/// Messages are emitted as [`ReceiverEvent::Message`]; whoever consumes the
/// events is responsible for settling them.
pub struct Receiver<T: QueueTransport> {
    transport: T,
    session_id: SessionId,
    config: ReceiverConfig,
    lifecycle: Mutex<()>,
    running: Rc<Cell<bool>>,
    abort: RefCell<Option<oneshot::Sender<()>>>,
    loop_task: RefCell<Option<JoinHandle<()>>>,
    events_tx: mpsc::UnboundedSender<ReceiverEvent>,
    events_rx: RefCell<Option<ReceiverEvents>>,
}

impl<T: QueueTransport> Receiver<T> {
    /// Create an idle receiver for `session_id`.
    pub fn new(transport: T, session_id: SessionId, config: ReceiverConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            session_id,
            config,
            lifecycle: Mutex::new(()),
            running: Rc::new(Cell::new(false)),
            abort: RefCell::new(None),
            loop_task: RefCell::new(None),
            events_tx,
            events_rx: RefCell::new(Some(events_rx)),
        }
    }

    /// Session this receiver reads.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Whether the receive loop is running.
    pub fn is_running(&self) -> bool {
        self.running.get()
    }

    /// Take the event channel. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<ReceiverEvents> {
        self.events_rx.borrow_mut().take()
    }

    /// Start the receive loop. No-op if already running.
    ///
    /// Must be called from within a tokio `LocalSet`.
    pub async fn start(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.running.get() {
            return;
        }

        self.running.set(true);
        let _ = self.events_tx.send(ReceiverEvent::Started);
        tracing::debug!(session = %self.session_id, "receiver started");

        let (abort_tx, abort_rx) = oneshot::channel();
        *self.abort.borrow_mut() = Some(abort_tx);

        let context = LoopContext {
            transport: self.transport.clone(),
            session_id: self.session_id.clone(),
            config: self.config.clone(),
            running: self.running.clone(),
            events: self.events_tx.clone(),
        };
        *self.loop_task.borrow_mut() = Some(tokio::task::spawn_local(receive_loop(
            context, abort_rx,
        )));

        tokio::time::sleep(self.config.settle_delay).await;
    }

    /// Stop the receive loop and wait for it to exit. No-op if idle.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.running.get() {
            return;
        }

        if let Some(abort) = self.abort.borrow_mut().take() {
            let _ = abort.send(());
        }
        let task = self.loop_task.borrow_mut().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(session = %self.session_id, error = %e, "receive loop ended abnormally");
                self.running.set(false);
            }
        }
        tracing::debug!(session = %self.session_id, "receiver stopped");

        tokio::time::sleep(self.config.settle_delay).await;
    }
}

enum Attempt {
    Aborted,
    Received(Result<Vec<queuerpc_core::ReceivedMessage>, TransportError>),
    Overrun,
}

async fn receive_loop<T: QueueTransport>(context: LoopContext<T>, mut abort: oneshot::Receiver<()>) {
    let config = &context.config;
    let mut handle = context.transport.create_receiver(&context.session_id);
    let mut backoff = FibonacciBackoff::new(config.backoff_min, config.backoff_max);

    loop {
        let attempt_started = Instant::now();
        let attempt = tokio::select! {
            biased;
            _ = &mut abort => Attempt::Aborted,
            result = handle.receive_messages(config.max_messages, config.idle_timeout) => {
                Attempt::Received(result)
            }
            _ = tokio::time::sleep(config.overrun_after()) => Attempt::Overrun,
        };

        match attempt {
            Attempt::Aborted => break,

            Attempt::Received(Ok(messages)) => {
                backoff.reset();
                for message in messages {
                    tracing::debug!(
                        session = %context.session_id,
                        message_id = %message.envelope().message_id,
                        body = message.envelope().body.kind(),
                        delivery_count = message.delivery_count(),
                        "message received"
                    );
                    context.emit(ReceiverEvent::Message(message));
                }
            }

            Attempt::Overrun => {
                let waited = attempt_started.elapsed();
                tracing::warn!(
                    session = %context.session_id,
                    waited = ?waited,
                    "receive overrun, recreating session handle"
                );
                context.warn(WarningKind::ReceiveOverrun { waited });
                let _ = handle.close().await;
                handle = context.transport.create_receiver(&context.session_id);
            }

            Attempt::Received(Err(TransportError::ConnectionClosed)) => {
                tracing::warn!(session = %context.session_id, "connection closed, receive loop exiting");
                context.warn(WarningKind::ReceiveFailed(TransportError::ConnectionClosed));
                break;
            }

            Attempt::Received(Err(e)) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    session = %context.session_id,
                    error = %e,
                    backoff = ?delay,
                    "receive failed"
                );
                let handle_closed =
                    handle.is_closed() || matches!(e, TransportError::ReceiverClosed { .. });
                context.warn(WarningKind::ReceiveFailed(e));
                if handle_closed {
                    let _ = handle.close().await;
                    handle = context.transport.create_receiver(&context.session_id);
                }
                if !wait_backoff(&mut abort, delay).await {
                    break;
                }
            }
        }
    }

    let _ = handle.close().await;
    context.running.set(false);
    context.emit(ReceiverEvent::Stopped);
}

/// Sleep for `delay` unless aborted first. Returns `false` on abort.
async fn wait_backoff(abort: &mut oneshot::Receiver<()>, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = abort => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
