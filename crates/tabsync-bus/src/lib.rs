//! The broadcast bus every Facade Connection, Facade Document, and the
//! Coordinator share.
//!
//! The bus is an ordered, at-most-once, best-effort multicast: every
//! subscriber active at send time receives the frame, including the
//! sender itself (loopback filtering is the Broker's job, not the
//! bus's). A slow subscriber that falls behind the channel's capacity
//! misses frames rather than stalling the sender.

#![warn(missing_docs)]

mod bus;

pub use bus::{BroadcastBus, Bus, BusError, BusReceiver, DEFAULT_CHANNEL_CAPACITY};
