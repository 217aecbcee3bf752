//! Identifier types.
//!
//! - [`MessageId`]: unique per outbound envelope; doubles as the call
//!   correlation id for requests.
//! - [`SessionId`]: names a logical sub-channel of the queue, either an RPC
//!   target or a caller's private reply channel.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a session identifier.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Errors raised while validating identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The identifier was empty.
    #[error("session id cannot be empty")]
    Empty,

    /// The identifier exceeded [`MAX_SESSION_ID_LEN`].
    #[error("session id too long: {len} characters (max: {max})")]
    TooLong {
        /// Actual length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
}

/// 128 random bits rendered as 32 lowercase hex characters.
fn random_hex128() -> String {
    let first: u64 = rand::random();
    let second: u64 = rand::random();
    format!("{:016x}{:016x}", first, second)
}

/// Unique identifier of one envelope.
///
/// Generated ids are 128-bit random values, so collisions within one client
/// lifetime are not a practical concern. Ids read from the wire are accepted
/// verbatim.
///
/// ```
/// use queuerpc_core::MessageId;
///
/// let a = MessageId::random();
/// let b = MessageId::random();
/// assert_ne!(a, b);
/// assert_eq!(a.as_str().len(), 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(random_hex128())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MessageId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a session on the queue.
///
/// ```
/// use queuerpc_core::SessionId;
///
/// let session: SessionId = "test6".parse().unwrap();
/// assert_eq!(session.as_str(), "test6");
/// assert!(SessionId::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Create a validated session id.
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdError::Empty);
        }
        let len = id.chars().count();
        if len > MAX_SESSION_ID_LEN {
            return Err(IdError::TooLong {
                len,
                max: MAX_SESSION_ID_LEN,
            });
        }
        Ok(Self(id))
    }

    /// Generate a random session id, used as a client's reply identity.
    pub fn random() -> Self {
        Self(random_hex128())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for SessionId {
    type Error = IdError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl FromStr for SessionId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
