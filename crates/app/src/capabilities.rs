//! Capability graph builder — polls the remote inventory and publishes
//! immutable snapshots.
//!
//! Readers take an `Arc` of the current snapshot and keep using it for as
//! long as they need; a refresh swaps the pointer and never touches a
//! published graph.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use autoedge_domain::capability::{CapabilityGraph, NodeDescriptor};
use autoedge_domain::target::TargetRef;

use crate::ports::{Clock, RemotePlatform};

/// Builds and serves [`CapabilityGraph`] snapshots.
pub struct CapabilityGraphBuilder<R, C> {
    remote: Arc<R>,
    clock: Arc<C>,
    current: RwLock<Arc<CapabilityGraph>>,
    next_version: AtomicU64,
    attempts: u32,
    attempt_delay: Duration,
}

impl<R, C> CapabilityGraphBuilder<R, C>
where
    R: RemotePlatform,
    C: Clock,
{
    /// `attempts` bounds the inventory calls of one refresh (at least one).
    pub fn new(remote: Arc<R>, clock: Arc<C>, attempts: u32, attempt_delay: Duration) -> Self {
        Self {
            remote,
            clock,
            current: RwLock::new(Arc::new(CapabilityGraph::empty())),
            next_version: AtomicU64::new(1),
            attempts: attempts.max(1),
            attempt_delay,
        }
    }

    /// The snapshot planners bind against.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CapabilityGraph> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Resolve a target in the current snapshot.
    #[must_use]
    pub fn lookup(&self, target: &TargetRef) -> Option<NodeDescriptor> {
        self.snapshot().lookup(target).map(NodeDescriptor::from)
    }

    /// Fetch the inventory and publish a new snapshot.
    ///
    /// After `attempts` failed fetches the last good snapshot is republished
    /// flagged as stale; a partially fetched inventory is never merged.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self) -> Arc<CapabilityGraph> {
        for attempt in 1..=self.attempts {
            match self.remote.inventory().await {
                Ok(inventory) => {
                    let version = self.next_version.fetch_add(1, Ordering::SeqCst);
                    let graph = Arc::new(CapabilityGraph::from_inventory(
                        version,
                        self.clock.now(),
                        inventory,
                    ));
                    tracing::debug!(
                        version,
                        entities = graph.entities.len(),
                        services = graph.services.len(),
                        "capability graph refreshed"
                    );
                    self.publish(Arc::clone(&graph));
                    return graph;
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "inventory fetch failed");
                    if attempt < self.attempts {
                        self.clock.sleep(self.attempt_delay).await;
                    }
                }
            }
        }
        let stale = Arc::new(self.snapshot().as_stale());
        tracing::warn!(version = stale.version, "serving stale capability graph");
        self.publish(Arc::clone(&stale));
        stale
    }

    fn publish(&self, graph: Arc<CapabilityGraph>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = graph;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRemote, ManualClock};

    fn builder(remote: &Arc<FakeRemote>) -> CapabilityGraphBuilder<FakeRemote, ManualClock> {
        CapabilityGraphBuilder::new(
            Arc::clone(remote),
            Arc::new(ManualClock::default()),
            3,
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn should_start_with_empty_stale_snapshot() {
        let builder = builder(&Arc::new(FakeRemote::home()));
        let graph = builder.snapshot();
        assert_eq!(graph.version, 0);
        assert!(graph.stale);
        assert!(graph.entities.is_empty());
    }

    #[tokio::test]
    async fn should_publish_new_snapshot_on_refresh() {
        let builder = builder(&Arc::new(FakeRemote::home()));
        let graph = builder.refresh().await;
        assert_eq!(graph.version, 1);
        assert!(!graph.stale);
        assert!(builder.lookup(&TargetRef::entity("light.kitchen_light")).is_some());
        assert!(builder.lookup(&TargetRef::entity("nonexistent")).is_none());
    }

    #[tokio::test]
    async fn should_serve_last_good_snapshot_as_stale_when_platform_is_down() {
        let remote = Arc::new(FakeRemote::home());
        let builder = builder(&remote);
        let good = builder.refresh().await;

        remote.set_inventory_down(true);
        let stale = builder.refresh().await;
        assert!(stale.stale);
        assert_eq!(stale.version, good.version);
        assert_eq!(stale.entities, good.entities);
        assert!(!good.stale, "published snapshots are never mutated");
    }

    #[tokio::test]
    async fn should_keep_in_flight_snapshot_stable_across_refresh() {
        let remote = Arc::new(FakeRemote::home());
        let builder = builder(&remote);
        builder.refresh().await;
        let held = builder.snapshot();

        remote.set_state("light.garage", autoedge_domain::state::EntityState::Off);
        builder.refresh().await;

        assert!(held.entity("light.garage").is_none());
        assert!(builder.snapshot().entity("light.garage").is_some());
    }
}
