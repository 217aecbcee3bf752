//! # queuerpc
//!
//! Request/response RPC on top of a session-addressable, at-least-once
//! message queue.
//!
//! A caller sends `(method, args)` into a target session; the handler bound
//! to that session acknowledges, runs the method, and replies with a result
//! or a structured error routed to the caller's own session.
//!
//! This crate provides:
//! - **Sender**: ordered outbound queue that retries failures from the head
//! - **Receiver**: recoverable session receive loop with overrun detection
//!   and Fibonacci backoff
//! - **RpcClient**: call registry with acknowledgement-refreshed timeouts
//! - **RpcServer**: session dispatcher driving acknowledge → invoke → reply
//!
//! The queue itself is abstracted by the traits in [`queuerpc_core`]; an
//! in-memory implementation lives in `queuerpc-memory`.
//!
//! Everything is single-threaded: run it on a current-thread tokio runtime
//! inside a `LocalSet`.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub use queuerpc_core::{
    Body, Envelope, MessageId, QueueTransport, ReceivedMessage, RemoteError, SessionId,
    TransportError,
};

// =============================================================================
// Modules
// =============================================================================

mod backoff;

/// Call registry and client.
pub mod client;

/// Configuration structures.
pub mod config;

/// Error types for calls.
pub mod error;

/// Typed events.
pub mod events;

/// Handler trait and method tables.
pub mod handler;

/// Session receive loop.
pub mod receiver;

/// Ordered outbound queue.
pub mod sender;

/// Session dispatcher.
pub mod server;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use backoff::FibonacciBackoff;
pub use client::{RpcClient, RpcEvents};
pub use config::{
    CallOptions, ClientConfig, ReceiverConfig, SenderConfig, ServerConfig, DEFAULT_CALL_TTL,
};
pub use error::{RpcError, RpcResult};
pub use events::{ReceiverEvent, RpcEvent, Warning, WarningKind};
pub use handler::{Handler, MethodTable};
pub use receiver::{Receiver, ReceiverEvents};
pub use sender::{Sender, WarningReceiver};
pub use server::RpcServer;
