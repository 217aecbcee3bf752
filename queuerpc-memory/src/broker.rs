//! Broker state shared by every connection to one [`MemoryQueue`].
//!
//! ```text
//! ┌───────────────────────────── MemoryQueue ─────────────────────────────┐
//! │ sessions: SessionId → SessionQueue                                     │
//! │   ready:  VecDeque<StoredMessage>     waiting for delivery (FIFO)      │
//! │   locked: token → LockedMessage       delivered, not yet settled       │
//! │   owner:  Option<receiver token>      one active receiver per session  │
//! │ faults:   one-shot counters           deterministic fault injection    │
//! │ chaos:    ChaosConfig + StdRng        seeded probabilistic faults      │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

use queuerpc_core::{Envelope, JsonCodec, MessageCodec, MessageId, SessionId, TransportError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::ChaosConfig;
use crate::connection::MemoryConnection;

/// Counters describing what the broker has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Envelopes accepted from senders or injected.
    pub sent: u64,
    /// Extra copies enqueued by duplicate faults.
    pub duplicated: u64,
    /// Deliveries, including redeliveries.
    pub delivered: u64,
    /// Deliveries of a message that had been delivered before.
    pub redelivered: u64,
    /// Messages settled with `complete()`.
    pub completed: u64,
    /// Messages settled with `abandon()`.
    pub abandoned: u64,
    /// Messages dropped because their time-to-live elapsed.
    pub expired: u64,
}

/// One-shot fault counters. Each pending count fires once per operation.
#[derive(Debug, Default)]
pub(crate) struct FaultPlan {
    pub(crate) fail_sends: u32,
    pub(crate) duplicate_sends: u32,
    pub(crate) fail_receives: u32,
    pub(crate) stall_receives: u32,
    pub(crate) close_receives: u32,
}

/// A message at rest.
pub(crate) struct StoredMessage {
    message_id: MessageId,
    bytes: Vec<u8>,
    delivery_count: u32,
    expires_at: Option<Instant>,
}

struct LockedMessage {
    message: StoredMessage,
    holder: u64,
}

#[derive(Default)]
struct SessionQueue {
    ready: VecDeque<StoredMessage>,
    locked: HashMap<u64, LockedMessage>,
    owner: Option<u64>,
    notify: Rc<Notify>,
}

/// A message handed to a receiver under `lock_token`.
pub(crate) struct Delivery {
    pub(crate) lock_token: u64,
    pub(crate) message_id: MessageId,
    pub(crate) bytes: Vec<u8>,
    pub(crate) delivery_count: u32,
}

pub(crate) struct BrokerState {
    sessions: HashMap<SessionId, SessionQueue>,
    next_token: u64,
    pub(crate) faults: FaultPlan,
    chaos: ChaosConfig,
    rng: StdRng,
    pub(crate) stats: QueueStats,
}

impl BrokerState {
    fn new(chaos: ChaosConfig) -> Self {
        Self {
            sessions: HashMap::new(),
            next_token: 1,
            faults: FaultPlan::default(),
            rng: StdRng::seed_from_u64(chaos.seed),
            chaos,
            stats: QueueStats::default(),
        }
    }

    pub(crate) fn next_token(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        token
    }

    fn session_mut(&mut self, session_id: &SessionId) -> &mut SessionQueue {
        self.sessions.entry(session_id.clone()).or_default()
    }

    pub(crate) fn notify_handle(&mut self, session_id: &SessionId) -> Rc<Notify> {
        self.session_mut(session_id).notify.clone()
    }

    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.random_bool(probability.clamp(0.0, 1.0))
    }

    pub(crate) fn roll_send_failure(&mut self) -> bool {
        if self.faults.fail_sends > 0 {
            self.faults.fail_sends -= 1;
            return true;
        }
        let probability = self.chaos.send_failure_probability;
        self.roll(probability)
    }

    pub(crate) fn roll_duplicate(&mut self) -> bool {
        if self.faults.duplicate_sends > 0 {
            self.faults.duplicate_sends -= 1;
            return true;
        }
        let probability = self.chaos.duplicate_probability;
        self.roll(probability)
    }

    /// Enqueue `copies` copies of an encoded envelope and wake waiters.
    pub(crate) fn enqueue(
        &mut self,
        session_id: &SessionId,
        message_id: MessageId,
        bytes: Vec<u8>,
        time_to_live: Duration,
        copies: u32,
    ) {
        // A zero time-to-live means the message never expires.
        let expires_at = (!time_to_live.is_zero()).then(|| Instant::now() + time_to_live);

        self.stats.sent += 1;
        self.stats.duplicated += u64::from(copies.saturating_sub(1));

        let session = self.session_mut(session_id);
        for _ in 0..copies {
            session.ready.push_back(StoredMessage {
                message_id: message_id.clone(),
                bytes: bytes.clone(),
                delivery_count: 0,
                expires_at,
            });
        }
        session.notify.notify_waiters();
    }

    /// Make `holder` the session's active receiver.
    pub(crate) fn claim(&mut self, session_id: &SessionId, holder: u64) -> Result<(), TransportError> {
        let session = self.session_mut(session_id);
        match session.owner {
            None => {
                session.owner = Some(holder);
                Ok(())
            }
            Some(owner) if owner == holder => Ok(()),
            Some(_) => Err(TransportError::SessionLocked {
                session_id: session_id.to_string(),
            }),
        }
    }

    /// Lock up to `max` ready messages for `holder`, dropping expired ones.
    pub(crate) fn take_ready(
        &mut self,
        session_id: &SessionId,
        holder: u64,
        max: usize,
        now: Instant,
    ) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        let mut expired = 0;

        while deliveries.len() < max {
            let Some(mut message) = self.session_mut(session_id).ready.pop_front() else {
                break;
            };

            if message.expires_at.is_some_and(|at| at <= now) {
                tracing::debug!(
                    session = %session_id,
                    message_id = %message.message_id,
                    "dropping expired message"
                );
                expired += 1;
                continue;
            }

            message.delivery_count += 1;
            if message.delivery_count > 1 {
                self.stats.redelivered += 1;
            }
            self.stats.delivered += 1;

            let lock_token = self.next_token();
            deliveries.push(Delivery {
                lock_token,
                message_id: message.message_id.clone(),
                bytes: message.bytes.clone(),
                delivery_count: message.delivery_count,
            });
            self.session_mut(session_id)
                .locked
                .insert(lock_token, LockedMessage { message, holder });
        }

        self.stats.expired += expired;
        deliveries
    }

    fn take_locked(
        &mut self,
        session_id: &SessionId,
        lock_token: u64,
        message_id: &MessageId,
    ) -> Result<StoredMessage, TransportError> {
        self.session_mut(session_id)
            .locked
            .remove(&lock_token)
            .map(|locked| locked.message)
            .ok_or_else(|| TransportError::LockLost {
                message_id: message_id.to_string(),
            })
    }

    pub(crate) fn complete(
        &mut self,
        session_id: &SessionId,
        lock_token: u64,
        message_id: &MessageId,
    ) -> Result<(), TransportError> {
        self.take_locked(session_id, lock_token, message_id)?;
        self.stats.completed += 1;
        Ok(())
    }

    pub(crate) fn abandon(
        &mut self,
        session_id: &SessionId,
        lock_token: u64,
        message_id: &MessageId,
    ) -> Result<(), TransportError> {
        let message = self.take_locked(session_id, lock_token, message_id)?;
        self.stats.abandoned += 1;
        let session = self.session_mut(session_id);
        session.ready.push_front(message);
        session.notify.notify_waiters();
        Ok(())
    }

    /// Drop `holder`'s claim on the session and return its unsettled
    /// messages to the head of the queue, oldest first.
    pub(crate) fn release(&mut self, session_id: &SessionId, holder: u64) {
        let session = self.session_mut(session_id);
        if session.owner == Some(holder) {
            session.owner = None;
        }

        let mut tokens: Vec<u64> = session
            .locked
            .iter()
            .filter(|(_, locked)| locked.holder == holder)
            .map(|(token, _)| *token)
            .collect();
        tokens.sort_unstable();

        for token in tokens.into_iter().rev() {
            if let Some(locked) = session.locked.remove(&token) {
                session.ready.push_front(locked.message);
            }
        }
        session.notify.notify_waiters();
    }

    pub(crate) fn wake_all(&self) {
        for session in self.sessions.values() {
            session.notify.notify_waiters();
        }
    }
}

/// An in-memory, session-addressable, at-least-once queue.
///
/// Cloning yields another handle to the same broker. Each call to
/// [`connect`](Self::connect) returns an independent connection that can be
/// closed without affecting the others.
///
/// ```
/// use queuerpc_memory::MemoryQueue;
///
/// let queue = MemoryQueue::new();
/// let client = queue.connect();
/// let server = queue.connect();
/// # drop((client, server));
/// ```
#[derive(Clone)]
pub struct MemoryQueue {
    state: Rc<RefCell<BrokerState>>,
    codec: JsonCodec,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Create a broker without chaos.
    pub fn new() -> Self {
        Self::with_chaos(ChaosConfig::default())
    }

    /// Create a broker with probabilistic fault injection.
    pub fn with_chaos(chaos: ChaosConfig) -> Self {
        Self {
            state: Rc::new(RefCell::new(BrokerState::new(chaos))),
            codec: JsonCodec,
        }
    }

    /// Open a new connection to the broker.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection::new(self.clone())
    }

    /// Reject the next `count` sends.
    pub fn fail_next_sends(&self, count: u32) {
        self.state.borrow_mut().faults.fail_sends += count;
    }

    /// Enqueue the next `count` accepted sends twice.
    pub fn duplicate_next_sends(&self, count: u32) {
        self.state.borrow_mut().faults.duplicate_sends += count;
    }

    /// Fail the next `count` receive attempts with a transient error.
    pub fn fail_next_receives(&self, count: u32) {
        self.state.borrow_mut().faults.fail_receives += count;
    }

    /// Make the next `count` receive attempts hang until cancelled.
    pub fn stall_next_receives(&self, count: u32) {
        self.state.borrow_mut().faults.stall_receives += count;
    }

    /// Close the receive handle on the next `count` receive attempts.
    pub fn close_next_receives(&self, count: u32) {
        self.state.borrow_mut().faults.close_receives += count;
    }

    /// Snapshot of the broker counters.
    pub fn stats(&self) -> QueueStats {
        self.state.borrow().stats
    }

    /// Messages waiting for delivery on `session_id`.
    pub fn ready_count(&self, session_id: &SessionId) -> usize {
        self.state
            .borrow()
            .sessions
            .get(session_id)
            .map_or(0, |session| session.ready.len())
    }

    /// Messages delivered but not yet settled on `session_id`.
    pub fn locked_count(&self, session_id: &SessionId) -> usize {
        self.state
            .borrow()
            .sessions
            .get(session_id)
            .map_or(0, |session| session.locked.len())
    }

    /// Enqueue an envelope directly, bypassing connections and faults.
    pub fn inject(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = self.codec.encode(envelope)?;
        self.state.borrow_mut().enqueue(
            &envelope.session_id,
            envelope.message_id.clone(),
            bytes,
            envelope.time_to_live(),
            1,
        );
        Ok(())
    }

    /// Enqueue an envelope on behalf of a sender, applying send faults.
    pub(crate) fn accept(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = self.codec.encode(envelope)?;
        let mut state = self.state.borrow_mut();

        if state.roll_send_failure() {
            tracing::debug!(
                session = %envelope.session_id,
                message_id = %envelope.message_id,
                "injected send failure"
            );
            return Err(TransportError::SendFailed {
                message: "injected send failure".to_string(),
            });
        }

        let copies = if state.roll_duplicate() { 2 } else { 1 };
        state.enqueue(
            &envelope.session_id,
            envelope.message_id.clone(),
            bytes,
            envelope.time_to_live(),
            copies,
        );
        tracing::debug!(
            session = %envelope.session_id,
            message_id = %envelope.message_id,
            body = envelope.body.kind(),
            copies,
            "message enqueued"
        );
        Ok(())
    }

    pub(crate) fn state(&self) -> &Rc<RefCell<BrokerState>> {
        &self.state
    }

    pub(crate) fn codec(&self) -> &JsonCodec {
        &self.codec
    }
}
