//! Failures the hosted session can report back through the Coordinator.

use tabsync_protocol::{DocumentKey, OpApplyError, WireError};
use thiserror::Error;

/// Everything a [`crate::HostedSession`] implementation can fail at.
///
/// The Coordinator converts this into a [`WireError`] and replies with
/// it unchanged rather than crashing.
#[derive(Debug, Error)]
pub enum SessionError {
    /// `doc.create` was called against a key that already exists.
    #[error("document {0} already exists")]
    AlreadyExists(DocumentKey),
    /// A lookup found no such document (e.g. `doc.del` on a missing key).
    #[error("document {0} not found")]
    NotFound(DocumentKey),
    /// Applying a submitted operation failed.
    #[error(transparent)]
    OpApply(#[from] OpApplyError),
    /// A write-forwarding opcode this build of the hosted session has
    /// not implemented.
    #[error("operation not supported by this hosted session: {0}")]
    Unsupported(&'static str),
}

impl From<&SessionError> for WireError {
    fn from(value: &SessionError) -> Self {
        let code = match value {
            SessionError::AlreadyExists(_) => "already_exists",
            SessionError::NotFound(_) => "not_found",
            SessionError::OpApply(_) => "op_apply_failed",
            SessionError::Unsupported(_) => "unsupported",
        };
        WireError::new(value.to_string()).with_code(code)
    }
}
