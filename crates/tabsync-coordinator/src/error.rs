//! Errors the Coordinator can reply with.

use tabsync_protocol::WireError;
use tabsync_session::SessionError;
use thiserror::Error;

/// Everything a dispatched request can fail at, from the Coordinator's
/// point of view.
///
/// Every variant here is reported back to the caller via a `callback`
/// frame carrying `CallbackResult::Err` — the Coordinator never panics
/// or tears down on a failed request.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The hosted session rejected the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The inbound frame was not a request this Coordinator dispatches
    /// (a reply, an event, or an unrecognized opcode reaching dispatch).
    #[error("frame of type `{0}` is not a dispatchable request")]
    NotARequest(&'static str),
}

impl From<&CoordinatorError> for WireError {
    fn from(value: &CoordinatorError) -> Self {
        match value {
            CoordinatorError::Session(session_error) => WireError::from(session_error),
            CoordinatorError::NotARequest(opcode) => {
                WireError::new(value.to_string()).with_code(format!("not_a_request:{opcode}"))
            }
        }
    }
}
