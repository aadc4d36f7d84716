//! Errors a call through a [`crate::FacadeConnection`] or
//! [`crate::FacadeDocument`] can resolve to.

use tabsync_broker::BrokerCallError;
use tabsync_protocol::OpApplyError;
use thiserror::Error;

/// Everything a Facade-side call can fail at.
#[derive(Debug, Clone, Error)]
pub enum FacadeError {
    /// The underlying Broker call did not complete successfully — either
    /// a remote error, a bus-post failure, or the Broker being closed.
    #[error(transparent)]
    Call(#[from] BrokerCallError),
    /// Optimistic local application of a submitted op failed; the send
    /// is aborted and local data is left untouched.
    #[error(transparent)]
    OpApply(#[from] OpApplyError),
    /// A reply payload did not deserialize into the shape this call
    /// expected. Never expected in practice — the Coordinator only ever
    /// replies with what the corresponding request asked for — but kept
    /// as a typed outcome rather than a panic at this call boundary.
    #[error("malformed reply payload: {0}")]
    Decode(String),
}
