//! The Broker's event surface.

use tabsync_protocol::{ConnectionEventKind, DocEventKind, DocumentKey, Frame};
use tokio::sync::broadcast;

/// One event the Broker can surface to its owner.
///
/// Mirrors the `ready` / `close` / `error` / `doc.event` /
/// `connection.event` / `message` surface a tab observes. `doc.event`
/// and `connection.event` have already passed framing validation
/// (missing-field discards) by construction — [`DocEventKind`] and
/// [`ConnectionEventKind`] are closed enums, so a frame that deserialized
/// at all necessarily carries a well-formed payload.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    /// The bus was attached and the queue has begun draining.
    Ready,
    /// The Broker was closed.
    Close,
    /// A bus or callback-handler fault occurred outside the context of
    /// one specific pending call.
    Error {
        /// Description of the fault.
        message: String,
    },
    /// A document-scoped event, already routed to this tab by the Bus
    /// (the caller still filters by `(collection, id)` locally).
    DocEvent {
        /// The document this event concerns.
        key: DocumentKey,
        /// The event itself.
        event: DocEventKind,
    },
    /// A connection-scoped event.
    ConnectionEvent {
        /// The event itself.
        event: ConnectionEventKind,
    },
    /// A frame whose opcode this Broker did not expect to receive —
    /// either a genuinely unrecognized opcode ([`Frame::Unknown`]) or a
    /// request-shaped frame surfacing here because this process also
    /// happens to be listening (e.g. another tab's request, harmlessly
    /// ignored by everyone but the Coordinator).
    Message {
        /// The raw frame.
        frame: Frame,
    },
}

/// Capacity of the Broker's internal event broadcast channel. Generous
/// relative to expected event volume per tab; a lagging subscriber
/// drops old events rather than stalling dispatch (matches the Bus's
/// own lagging-receiver policy).
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A subscription handle returned by [`crate::Broker::events`].
pub struct BrokerEvents {
    pub(crate) receiver: broadcast::Receiver<BrokerEvent>,
}

impl BrokerEvents {
    /// Await the next event. Returns `None` once the Broker has closed
    /// and every event has been delivered.
    pub async fn recv(&mut self) -> Option<BrokerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
