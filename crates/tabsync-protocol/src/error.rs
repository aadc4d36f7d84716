//! Wire-level error representation and frame decode failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The `{message, code?, stack?}` record an error is serialized as on the
/// wire. The receiving endpoint reconstitutes this into whatever typed
/// error its own crate exposes to user callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Human-readable description.
    pub message: String,
    /// Machine-readable error code, if the origin supplied one.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    /// Origin-side stack trace, best-effort and never parsed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stack: Option<String>,
}

impl WireError {
    /// Construct a wire error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    /// Attach a machine-readable code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for WireError {}

/// A reconstituted, typed form of a [`WireError`] received from a remote
/// endpoint.
///
/// Carried inside `Result<T, RemoteError>` callback arguments wherever a
/// request's reply frame carried `CallbackResult::Err` — this is the
/// receiving side's reconstitution of the sender's serialized error, not
/// a plumbing failure of the Broker itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RemoteError(WireError);

impl RemoteError {
    /// The remote side's human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0.message
    }

    /// The remote side's machine-readable code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.0.code.as_deref()
    }

    /// Borrow the underlying wire representation.
    #[must_use]
    pub fn wire_error(&self) -> &WireError {
        &self.0
    }
}

impl From<WireError> for RemoteError {
    fn from(value: WireError) -> Self {
        Self(value)
    }
}

impl From<&WireError> for RemoteError {
    fn from(value: &WireError) -> Self {
        Self(value.clone())
    }
}

/// Frame decode failures.
///
/// These never reach application code — the Broker discards the frame
/// and logs it; they exist as a typed enum so the discard sites can
/// match instead of string-matching a decode message.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The inbound record had no recognizable `type` field at all.
    #[error("frame missing `type` field")]
    MissingType,
    /// The `type` field was present but a required field for that
    /// opcode was missing or had the wrong shape.
    #[error("frame of type `{opcode}` missing or malformed field `{field}`")]
    InvalidField {
        /// The opcode being decoded.
        opcode: String,
        /// The offending field.
        field: String,
    },
}
