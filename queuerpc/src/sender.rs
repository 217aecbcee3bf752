//! Ordered, retrying outbound queue.
//!
//! ```text
//! send(e1) send(e2) send(e3)
//!    │        │        │
//!    ▼        ▼        ▼
//! ┌──────────────────────────┐        ┌─────────────┐
//! │ pending: e1 → e2 → e3    │──head─►│ drain task  │──► QueueSender::send
//! └──────────────────────────┘        └─────────────┘
//!              ▲                             │ failure
//!              └────── push_front(e1) ◄──────┘ then sleep(retry_cooldown)
//! ```
//!
//! A failed entry goes back to the head, so no later envelope is attempted
//! before it. One drain task runs at a time; it exits when the queue is
//! empty and is respawned by the next `send()`, or when the last [`Sender`]
//! handle is dropped.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::rc::{Rc, Weak};

use queuerpc_core::{Envelope, QueueSender};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SenderConfig;
use crate::error::{RpcError, RpcResult};
use crate::events::{Warning, WarningKind};

/// Warning channel handed out by [`Sender::take_warnings`].
pub type WarningReceiver = mpsc::UnboundedReceiver<Warning>;

struct PendingSend {
    envelope: Envelope,
    completion: oneshot::Sender<RpcResult<()>>,
}

#[derive(Default)]
struct SendQueue {
    pending: VecDeque<PendingSend>,
    offloading: bool,
    closed: bool,
    drain_task: Option<JoinHandle<()>>,
}

struct SenderInner<S: QueueSender> {
    handle: S,
    config: SenderConfig,
    queue: RefCell<SendQueue>,
    warnings_tx: mpsc::UnboundedSender<Warning>,
    warnings_rx: RefCell<Option<WarningReceiver>>,
}

/// Ordered outbound queue over a [`QueueSender`].
///
/// Must be used from within a tokio `LocalSet`: the drain runs as a local
/// task.
pub struct Sender<S: QueueSender + 'static> {
    inner: Rc<SenderInner<S>>,
}

impl<S: QueueSender + 'static> Clone for Sender<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: QueueSender + 'static> Sender<S> {
    /// Wrap a transport sender.
    pub fn new(handle: S, config: SenderConfig) -> Self {
        let (warnings_tx, warnings_rx) = mpsc::unbounded_channel();
        Self {
            inner: Rc::new(SenderInner {
                handle,
                config,
                queue: RefCell::new(SendQueue::default()),
                warnings_tx,
                warnings_rx: RefCell::new(Some(warnings_rx)),
            }),
        }
    }

    /// Take the warning channel. Returns `None` after the first call.
    pub fn take_warnings(&self) -> Option<WarningReceiver> {
        self.inner.warnings_rx.borrow_mut().take()
    }

    /// Queue `envelope` for delivery.
    ///
    /// The envelope is enqueued before this returns; the future only reports
    /// when the transport accepted it. Dropping the future does not cancel
    /// the send.
    pub fn send(&self, envelope: Envelope) -> impl Future<Output = RpcResult<()>> + 'static {
        let accepted = self.push(envelope);
        async move { accepted.await.unwrap_or(Err(RpcError::Closed)) }
    }

    /// Queue `envelope` for delivery without waiting for the outcome.
    pub fn post(&self, envelope: Envelope) {
        let _accepted = self.push(envelope);
    }

    fn push(&self, envelope: Envelope) -> oneshot::Receiver<RpcResult<()>> {
        let (completion, accepted) = oneshot::channel();

        let mut queue = self.inner.queue.borrow_mut();
        if queue.closed {
            let _ = completion.send(Err(RpcError::Closed));
            return accepted;
        }

        tracing::debug!(
            session = %envelope.session_id,
            message_id = %envelope.message_id,
            body = envelope.body.kind(),
            queued = queue.pending.len(),
            "enqueueing envelope"
        );
        queue.pending.push_back(PendingSend {
            envelope,
            completion,
        });
        if !queue.offloading {
            queue.offloading = true;
            queue.drain_task = Some(tokio::task::spawn_local(drain(Rc::downgrade(&self.inner))));
        }
        accepted
    }

    /// Entries not yet accepted by the transport.
    pub fn pending_len(&self) -> usize {
        self.inner.queue.borrow().pending.len()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.queue.borrow().closed
    }

    /// Stop draining, fail pending entries with [`RpcError::Closed`] and
    /// close the transport sender. Idempotent.
    pub async fn close(&self) -> RpcResult<()> {
        let pending = {
            let mut queue = self.inner.queue.borrow_mut();
            if queue.closed {
                return Ok(());
            }
            queue.closed = true;
            queue.offloading = false;
            if let Some(task) = queue.drain_task.take() {
                task.abort();
            }
            std::mem::take(&mut queue.pending)
        };

        if !pending.is_empty() {
            tracing::debug!(dropped = pending.len(), "sender closed with pending envelopes");
        }
        for entry in pending {
            let _ = entry.completion.send(Err(RpcError::Closed));
        }

        self.inner.handle.close().await?;
        Ok(())
    }
}

async fn drain<S: QueueSender>(sender: Weak<SenderInner<S>>) {
    loop {
        let Some(inner) = sender.upgrade() else {
            tracing::debug!("sender dropped, drain exiting");
            return;
        };
        let entry = {
            let mut queue = inner.queue.borrow_mut();
            match queue.pending.pop_front() {
                Some(entry) => entry,
                None => {
                    queue.offloading = false;
                    queue.drain_task = None;
                    return;
                }
            }
        };

        match inner.handle.send(&entry.envelope).await {
            Ok(()) => {
                tracing::debug!(
                    session = %entry.envelope.session_id,
                    message_id = %entry.envelope.message_id,
                    "envelope dispatched"
                );
                let _ = entry.completion.send(Ok(()));
            }
            Err(e) => {
                let cooldown = inner.config.retry_cooldown;
                tracing::warn!(
                    session = %entry.envelope.session_id,
                    message_id = %entry.envelope.message_id,
                    error = %e,
                    cooldown = ?cooldown,
                    "send failed, requeueing at head"
                );
                let _ = inner
                    .warnings_tx
                    .send(Warning::unscoped(WarningKind::SendFailed(e)));
                inner.queue.borrow_mut().pending.push_front(entry);
                drop(inner);
                tokio::time::sleep(cooldown).await;
            }
        }
    }
}
