//! Shared test harness wiring a [`Coordinator`] and any number of
//! [`FacadeConnection`]s onto one in-process bus.

use std::sync::Arc;

use tabsync_broker::{Broker, BrokerConfig};
use tabsync_bus::{Bus, BroadcastBus};
use tabsync_coordinator::{Coordinator, CoordinatorConfig};
use tabsync_facade::FacadeConnection;
use tabsync_protocol::{Op, OpAlgebra, OpApplyError, TabId};
use tabsync_session::{JsonPatchAlgebra, TestHostedSession};

/// A single-process rendering of a multi-tab cluster: one Coordinator
/// hosting an in-memory session, sharing one [`BroadcastBus`] with
/// however many tabs the scenario opens.
#[allow(dead_code)]
pub struct Cluster {
    /// The bus every endpoint in this cluster shares.
    pub bus: Arc<BroadcastBus>,
    /// The Coordinator hosting the authoritative session.
    pub coordinator: Coordinator,
}

#[allow(dead_code)]
impl Cluster {
    /// Start a cluster with a fresh in-memory hosted session.
    pub fn new() -> Self {
        let bus = Arc::new(BroadcastBus::new());
        let session = Arc::new(TestHostedSession::default());
        let coordinator = Coordinator::new(TabId::new(), CoordinatorConfig::default(), session);
        coordinator.attach_bus(Arc::clone(&bus) as Arc<dyn Bus>);
        Self { bus, coordinator }
    }

    /// Open a new tab: a [`FacadeConnection`] with its own [`Broker`],
    /// attached to this cluster's bus, applying ops through
    /// [`JsonPatchAlgebra`].
    pub fn open_tab(&self) -> FacadeConnection {
        self.open_tab_with_algebra(JsonPatchAlgebra)
    }

    /// As [`Cluster::open_tab`], but with a caller-supplied op algebra
    /// (e.g. [`CountingAlgebra`] for tests that want to observe how many
    /// times `apply` ran).
    pub fn open_tab_with_algebra(&self, algebra: impl OpAlgebra + 'static) -> FacadeConnection {
        let broker = Broker::new(TabId::new(), BrokerConfig::default());
        broker.attach_bus(Arc::clone(&self.bus) as Arc<dyn Bus>);
        broker.start_cleanup_timer();
        FacadeConnection::new(broker, Arc::new(algebra))
    }

    /// A bus subscriber positioned at "now", for scenarios that assert
    /// on the raw frames crossing the wire (e.g. S4's bulk-fetch frame).
    pub fn observe(&self) -> tabsync_bus::BusReceiver {
        self.bus.subscribe()
    }
}

impl Default for Cluster {
    fn default() -> Self {
        Self::new()
    }
}

/// An [`OpAlgebra`] that counts how many times `apply` was invoked, for
/// scenarios asserting on optimistic-vs-authoritative apply counts.
#[allow(dead_code)]
pub struct CountingAlgebra {
    inner: JsonPatchAlgebra,
    count: std::sync::atomic::AtomicUsize,
}

#[allow(dead_code)]
impl CountingAlgebra {
    /// Build a fresh counter starting at zero.
    pub fn new() -> Self {
        Self {
            inner: JsonPatchAlgebra,
            count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// How many times `apply` has run so far.
    pub fn count(&self) -> usize {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl OpAlgebra for CountingAlgebra {
    fn apply(&self, data: &mut serde_json::Value, op: &Op) -> Result<(), OpApplyError> {
        self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.apply(data, op)
    }
}

/// Wait up to `ms` milliseconds for `future`, panicking with a
/// scenario-specific message on timeout rather than hanging the suite.
#[allow(dead_code)]
pub async fn within_millis<F: std::future::Future>(ms: u64, label: &str, future: F) -> F::Output {
    tokio::time::timeout(std::time::Duration::from_millis(ms), future)
        .await
        .unwrap_or_else(|_| panic!("{label} did not complete within {ms}ms"))
}
