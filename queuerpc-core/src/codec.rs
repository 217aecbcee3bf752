//! Pluggable envelope serialization.
//!
//! Transports that store or ship envelopes as bytes go through a
//! [`MessageCodec`]. [`JsonCodec`] is the default and produces the camelCase
//! JSON wire shape described in the crate docs.
//!
//! # Example
//!
//! ```rust
//! use queuerpc_core::{Envelope, JsonCodec, MessageCodec, MessageId, SessionId};
//! use std::time::Duration;
//!
//! let session = SessionId::new("calc").unwrap();
//! let envelope = Envelope::request(
//!     MessageId::random(),
//!     session,
//!     "mul",
//!     serde_json::json!({"a": 5, "b": 3}),
//!     None,
//!     Duration::from_secs(30),
//! );
//!
//! let codec = JsonCodec;
//! let bytes = codec.encode(&envelope).unwrap();
//! let decoded: Envelope = codec.decode(&bytes).unwrap();
//! assert_eq!(decoded, envelope);
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Error type for codec operations.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Failed to encode a value to bytes.
    #[error("encode error: {0}")]
    Encode(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Failed to decode bytes to a value.
    #[error("decode error: {0}")]
    Decode(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Pluggable serialization format for envelopes at rest or on the wire.
///
/// `Clone + 'static` so a codec can live inside a transport handle that is
/// cloned into spawned tasks.
pub trait MessageCodec: Clone + 'static {
    /// Encode a serializable value to bytes.
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError>;

    /// Decode bytes into a value.
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl MessageCodec for JsonCodec {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(Box::new(e)))
    }

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(buf).map_err(|e| CodecError::Decode(Box::new(e)))
    }
}
