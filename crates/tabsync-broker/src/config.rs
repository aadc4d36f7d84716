//! Broker configuration.

/// Tunables for one [`crate::Broker`].
///
/// Mirrors the subset of enumerated configuration that the Broker
/// itself consumes; `channelName` lives on the [`tabsync_bus::Bus`]
/// instance the embedder constructs, not here.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Age after which an unanswered Pending Call is reaped silently.
    pub callback_max_age_ms: u64,
    /// Period of the cleanup reaper started by `start_cleanup_timer`
    /// (default 10s).
    pub cleanup_interval_ms: u64,
    /// Bound on the queue of frames accumulated before the bus is
    /// attached, so an embedder that never attaches a bus cannot leak
    /// memory unboundedly; oldest frames are dropped once the bound is
    /// hit, which is logged as a Bus-missing-adjacent warning.
    pub queue_capacity: usize,
    /// Kept for wire/config-surface parity with the `debug` field.
    /// Unused by library code: the embedding binary controls verbosity
    /// via `tracing_subscriber::EnvFilter` instead.
    pub debug: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            callback_max_age_ms: 30_000,
            cleanup_interval_ms: 10_000,
            queue_capacity: 4096,
            debug: false,
        }
    }
}
