//! The Pending Call record.

use tabsync_protocol::CallbackId;

use crate::error::BrokerCallError;

/// A handler invoked at most once with the outcome of one request.
pub type ReplyHandler = Box<dyn FnOnce(Result<serde_json::Value, BrokerCallError>) + Send>;

/// One outstanding request awaiting its `callback` frame.
///
/// Destroyed on response, on expiry, or on
/// `Broker::close`. An id is never reused within the Broker's
/// lifetime — `CallbackIdAllocator` guarantees this, not this type.
pub struct PendingCall {
    /// This call's id, duplicated from the map key for log sites that
    /// only hold the record.
    pub id: CallbackId,
    /// Send-time timestamp, used to measure age against
    /// `callback_max_age_ms`.
    pub created_at_ms: u64,
    /// Invoked exactly once: on reply, on expiry it is dropped
    /// un-invoked, and on `close` it is invoked with
    /// [`BrokerCallError::Closed`].
    pub handler: ReplyHandler,
}
