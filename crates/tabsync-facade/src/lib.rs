//! Per-tab mirror of the authoritative session.
//!
//! A [`FacadeConnection`] owns a [`tabsync_broker::Broker`] and hands out
//! [`FacadeDocument`]s that cache a local snapshot, apply submitted ops
//! optimistically, and reconcile against the Coordinator's broadcast
//! `doc.event` frames.

#![warn(missing_docs)]

mod connection;
mod document;
mod error;

pub use connection::{FacadeConnection, CONNECTION_EVENT_CHANNEL_CAPACITY};
pub use document::{FacadeDocEvent, FacadeDocument, DOC_EVENT_CHANNEL_CAPACITY};
pub use error::FacadeError;

use tabsync_protocol::Snapshot;

/// Decode a reply payload expected to be a [`Snapshot`].
///
/// Every request that primes a [`FacadeDocument`] (`doc.subscribe`,
/// `doc.fetch`, `doc.create`) replies with the same shape; centralized
/// here so each call site maps a decode failure to
/// [`FacadeError::Decode`] the same way.
pub(crate) fn decode_snapshot(value: serde_json::Value) -> Result<Snapshot, FacadeError> {
    serde_json::from_value(value).map_err(|e| FacadeError::Decode(e.to_string()))
}
