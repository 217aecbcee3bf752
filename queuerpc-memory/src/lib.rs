//! # queuerpc-memory
//!
//! An in-memory implementation of the queuerpc transport traits, for tests
//! and single-process use.
//!
//! Semantics follow a peek-lock session broker:
//!
//! - messages are addressed to a session and delivered in FIFO order;
//! - a delivered message stays locked until `complete()` or `abandon()`;
//! - abandoned or orphaned messages are redelivered (at-least-once);
//! - only one receiver may read a session at a time;
//! - messages whose time-to-live elapsed are dropped at delivery time.
//!
//! ## Fault injection
//!
//! | Fault | API | Effect |
//! |-------|-----|--------|
//! | Send failure | [`MemoryQueue::fail_next_sends`] | `send` returns `SendFailed` |
//! | Duplicate | [`MemoryQueue::duplicate_next_sends`] | message enqueued twice |
//! | Receive failure | [`MemoryQueue::fail_next_receives`] | `receive_messages` returns `ReceiveFailed` |
//! | Receive stall | [`MemoryQueue::stall_next_receives`] | `receive_messages` never resolves |
//! | Receiver close | [`MemoryQueue::close_next_receives`] | handle closes, returns `ReceiverClosed` |
//!
//! Probabilistic send faults are configured with [`ChaosConfig`].
//!
//! Everything is `Rc`-based and must be driven from a single-threaded
//! runtime (a tokio `LocalSet` or current-thread runtime).

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod broker;
mod config;
mod connection;

pub use broker::{MemoryQueue, QueueStats};
pub use config::ChaosConfig;
pub use connection::{MemoryConnection, MemoryReceiver, MemorySender};
