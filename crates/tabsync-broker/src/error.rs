//! Errors a call through the Broker can resolve to.

use tabsync_protocol::RemoteError;
use thiserror::Error;

/// The outcome delivered to a request's handler when it does not
/// succeed — everything specific to the plumbing of one call, as
/// opposed to a domain error the remote side chose to send back (that
/// arrives as [`BrokerCallError::Remote`]).
#[derive(Debug, Clone, Error)]
pub enum BrokerCallError {
    /// The remote endpoint replied with a serialized error.
    #[error(transparent)]
    Remote(#[from] RemoteError),
    /// The Broker was closed before a reply arrived; all pending calls
    /// are flushed with this error synchronously.
    #[error("broker closed")]
    Closed,
    /// Posting the frame to the bus failed transiently.
    #[error("post to bus failed: {0}")]
    PostFailed(String),
}
