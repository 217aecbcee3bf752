//! # queuerpc-core
//!
//! Core types shared by the queuerpc crates.
//!
//! - **Envelope**: the wire unit ([`Envelope`], [`Body`], [`RemoteError`])
//! - **Identifiers**: [`MessageId`] and [`SessionId`]
//! - **Codec**: [`MessageCodec`] with the default [`JsonCodec`]
//! - **Transport traits**: [`QueueTransport`], [`QueueSender`],
//!   [`SessionReceiver`], [`MessageLock`] describe the capability the RPC
//!   layer needs from a session queue
//!
//! ## Wire shape
//!
//! ```text
//! {
//!   "messageId": "9f0c…",                 unique per message
//!   "sessionId": "calc",                  target session
//!   "replyTo": "4be1…",                   caller's session (requests)
//!   "correlationId": "9f0c…",             answered request (replies)
//!   "timeToLive": 30000,                  transport expiry hint, ms
//!   "body": {"method": "mul", "args": {…}}
//!         | {"acknowledgement": true}
//!         | {"result": …}
//!         | {"error": {"name", "code", "details", "stack", "message"}}
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod codec;
mod envelope;
mod error;
mod remote_error;
mod transport;
mod types;

pub use codec::{CodecError, JsonCodec, MessageCodec};
pub use envelope::{Body, Envelope, REPLY_TIME_TO_LIVE};
pub use error::TransportError;
pub use remote_error::RemoteError;
pub use transport::{MessageLock, QueueSender, QueueTransport, ReceivedMessage, SessionReceiver};
pub use types::{IdError, MessageId, SessionId, MAX_SESSION_ID_LEN};
