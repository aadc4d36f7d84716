//! Coordinator configuration.

/// Tunables for one [`crate::Coordinator`].
///
/// `debug` is kept for config-surface parity but unused by library
/// code: observability is always-on `tracing`, gated by the embedding
/// binary's `tracing_subscriber::EnvFilter`, not a branch inside this
/// crate.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Unused by this crate; retained for config-surface parity.
    pub debug: bool,
    /// A tab not seen (no frame with its id observed) for longer than
    /// this is swept by the periodic stale-tab reaper.
    pub stale_tab_ms: u64,
    /// Period of the stale-tab reaper.
    pub reaper_interval_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debug: false,
            stale_tab_ms: 60_000,
            reaper_interval_ms: 10_000,
        }
    }
}
