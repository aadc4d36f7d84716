//! Wire schema shared by the broker, the facades, and the coordinator.
//!
//! This crate defines no behavior — only the frame types that cross the
//! broadcast bus, the identifiers used to correlate and route them, and
//! the error types the rest of the core reconstitutes on receipt.

#![warn(missing_docs)]

pub mod error;
pub mod frame;
pub mod ids;
pub mod key;
pub mod op;
pub mod snapshot;

pub use error::{DecodeError, RemoteError, WireError};
pub use frame::{CallbackResult, ConnectionEventKind, DocEventKind, Frame};
pub use ids::{CallbackId, TabId};
pub use key::DocumentKey;
pub use op::{OpAlgebra, OpApplyError};
pub use snapshot::{ConnectionState, Op, Snapshot};

/// Current time in milliseconds since the Unix epoch.
///
/// Frames carry a wall-clock timestamp stamped by the sender, used for
/// stamping outbound frames and comparing pending-call age; millisecond
/// resolution is sufficient for both.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
