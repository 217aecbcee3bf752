//! Structured errors relayed from a handler back to the caller.
//!
//! A [`RemoteError`] travels inside an error reply body as
//! `{name, code, details, stack, message}` and is rebuilt verbatim on the
//! calling side rather than summarized.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error reported by the remote side of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{name}: {message}")]
pub struct RemoteError {
    /// Error class name, e.g. `MethodNotFound`.
    pub name: String,

    /// Optional machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,

    /// Optional stack or backtrace captured by the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,

    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl RemoteError {
    /// Name used when the requested method does not exist on the handler.
    pub const METHOD_NOT_FOUND: &'static str = "MethodNotFound";

    /// Name used when call arguments do not decode into the method's input type.
    pub const INVALID_ARGUMENTS: &'static str = "InvalidArguments";

    /// Create an error with a name and message.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
            details: None,
            stack: None,
            message: message.into(),
        }
    }

    /// Attach a code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach structured details.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a stack trace.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// The reply sent when a handler lacks `method`.
    ///
    /// The method name is carried both in the message and in
    /// `details.method`.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            Self::METHOD_NOT_FOUND,
            format!("Method \"{}\" does not exist", method),
        )
        .with_code("METHOD_NOT_FOUND")
        .with_details(serde_json::json!({ "method": method }))
    }

    /// The reply sent when arguments fail to decode for `method`.
    pub fn invalid_arguments(method: &str, reason: impl std::fmt::Display) -> Self {
        Self::new(
            Self::INVALID_ARGUMENTS,
            format!("invalid arguments for \"{}\": {}", method, reason),
        )
        .with_code("INVALID_ARGUMENTS")
        .with_details(serde_json::json!({ "method": method }))
    }

    /// Whether this is a method-not-found error.
    pub fn is_method_not_found(&self) -> bool {
        self.name == Self::METHOD_NOT_FOUND
    }

    /// Method name carried in `details.method`, if any.
    pub fn method(&self) -> Option<&str> {
        self.details.as_ref()?.get("method")?.as_str()
    }
}
