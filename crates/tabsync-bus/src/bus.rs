use std::fmt;
use std::sync::Arc;

use tabsync_protocol::Frame;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity for [`BroadcastBus`].
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Transport-level failure posting a frame.
///
/// Unreachable through [`BroadcastBus`] — an in-process broadcast
/// channel cannot fail to post, only fail to have listeners, which is
/// not an error. The variant exists for `Bus` implementations
/// that front a real inter-process transport.
#[derive(Debug, Error)]
pub enum BusError {
    /// The transport is no longer available.
    #[error("bus closed: {0}")]
    Closed(String),
}

/// The in-process broadcast transport every endpoint sends frames
/// through and subscribes to.
///
/// Kept as a trait (rather than exposing `BroadcastBus` directly)
/// so the Coordinator and Facade crates can be tested against an
/// in-memory double without pulling in tokio's broadcast channel.
pub trait Bus: fmt::Debug + Send + Sync {
    /// Broadcast a frame to every current subscriber. Returns the number
    /// of subscribers the frame was delivered to; zero is not an error —
    /// it simply means nobody was listening. Returns [`BusError`] only
    /// on genuine transport failure.
    fn send(&self, frame: Frame) -> Result<usize, BusError>;

    /// Subscribe to every frame sent from this point forward.
    fn subscribe(&self) -> BusReceiver;

    /// Number of currently active subscribers.
    fn subscriber_count(&self) -> usize;
}

/// A `tokio::sync::broadcast`-backed [`Bus`].
///
/// Frames are wrapped in `Arc` so fan-out to many subscribers is a
/// refcount bump rather than a clone of the frame's JSON payload.
#[derive(Debug, Clone)]
pub struct BroadcastBus {
    sender: broadcast::Sender<Arc<Frame>>,
}

impl BroadcastBus {
    /// Create a bus with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a bus with an explicit channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for BroadcastBus {
    fn send(&self, frame: Frame) -> Result<usize, BusError> {
        let opcode = frame.opcode().to_string();
        let frame = Arc::new(frame);
        match self.sender.send(Arc::clone(&frame)) {
            Ok(count) => {
                trace!(opcode = %opcode, receivers = count, "frame sent");
                Ok(count)
            }
            Err(_) => {
                trace!(opcode = %opcode, "frame sent with no subscribers");
                Ok(0)
            }
        }
    }

    fn subscribe(&self) -> BusReceiver {
        BusReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A subscription handle returned by [`Bus::subscribe`].
pub struct BusReceiver {
    receiver: broadcast::Receiver<Arc<Frame>>,
}

impl BusReceiver {
    /// Await the next frame. Returns `None` once the bus is closed
    /// (every `Bus` handle dropped); a lagged receiver logs a warning
    /// and keeps waiting rather than surfacing the gap to the caller,
    /// since frame loss here means another tab's broadcast, not this
    /// endpoint's own requests (those are correlated through the
    /// Broker's pending-call table, not bus ordering).
    pub async fn recv(&mut self) -> Option<Arc<Frame>> {
        loop {
            match self.receiver.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "bus receiver lagged, frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
