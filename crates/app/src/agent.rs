//! The assembled engine: every service wired over one set of ports.

use std::sync::Arc;

use autoedge_domain::capability::CapabilityGraph;
use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::event::{Event, EventType};

use crate::capabilities::CapabilityGraphBuilder;
use crate::circuits::CircuitRegistry;
use crate::dispatcher::Dispatcher;
use crate::engine::ExecutionEngine;
use crate::event_bus::InProcessEventBus;
use crate::execution::ExecutionService;
use crate::health::{Health, HealthReport};
use crate::housekeeping::Janitor;
use crate::ports::{Clock, EventPublisher, RemotePlatform, Storage};
use crate::queue::{Recovery, TaskQueue};
use crate::rollout::RolloutManager;
use crate::router::TriggerRouter;
use crate::scheduler::Scheduler;
use crate::settings::EngineSettings;
use crate::specs::SpecService;

/// Owns the services of one engine instance.
///
/// Inbound adapters (HTTP, the binary's background loops) hold an
/// `Arc<Agent>` and reach the services through its fields.
pub struct Agent<S, R, C> {
    pub settings: EngineSettings,
    pub events: Arc<InProcessEventBus>,
    pub graph: Arc<CapabilityGraphBuilder<R, C>>,
    pub specs: SpecService<S, R, C>,
    pub queue: Arc<TaskQueue<S, C>>,
    pub circuits: Arc<CircuitRegistry<S>>,
    pub engine: Arc<ExecutionEngine<S, R, C>>,
    pub execution: Arc<ExecutionService<S, R, C>>,
    pub scheduler: Arc<Scheduler<S, R, C>>,
    pub rollouts: RolloutManager<S, R, C>,
    pub router: TriggerRouter<S, R, C>,
    pub janitor: Janitor<S, C>,
    pub dispatcher: Arc<Dispatcher<S, R, C>>,
    pub health: Arc<Health>,
}

impl<S, R, C> Agent<S, R, C>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    pub fn new(
        store: Arc<S>,
        remote: Arc<R>,
        clock: Arc<C>,
        events: Arc<InProcessEventBus>,
        settings: EngineSettings,
    ) -> Self {
        let graph = Arc::new(CapabilityGraphBuilder::new(
            Arc::clone(&remote),
            Arc::clone(&clock),
            settings.refresh_attempts,
            settings.refresh_retry_delay,
        ));
        let queue = Arc::new(TaskQueue::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&events),
            settings.high_water_mark,
        ));
        let circuits = Arc::new(CircuitRegistry::new(
            Arc::clone(&store),
            settings.circuit,
        ));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&store),
            remote,
            Arc::clone(&clock),
            Arc::clone(&circuits),
            Arc::clone(&events),
            settings.retry,
            settings.call_timeout,
        ));
        let execution = Arc::new(ExecutionService::new(
            Arc::clone(&store),
            Arc::clone(&graph),
            Arc::clone(&queue),
            Arc::clone(&engine),
            Arc::clone(&clock),
            settings.policy.clone(),
            settings.idempotency_retention,
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&execution),
        ));
        let rollouts = RolloutManager::new(
            Arc::clone(&store),
            Arc::clone(&graph),
            Arc::clone(&queue),
            Arc::clone(&scheduler),
            Arc::clone(&events),
            Arc::clone(&clock),
            settings.policy.clone(),
        );
        let health = Arc::new(Health::default());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&engine),
            Arc::clone(&health),
            Arc::clone(&clock),
        ));
        Self {
            specs: SpecService::new(
                Arc::clone(&store),
                Arc::clone(&graph),
                Arc::clone(&clock),
                settings.policy.clone(),
            ),
            router: TriggerRouter::new(Arc::clone(&store), Arc::clone(&execution)),
            janitor: Janitor::new(
                store,
                clock,
                settings.history_retention,
                settings.max_records,
            ),
            settings,
            events,
            graph,
            queue,
            circuits,
            engine,
            execution,
            scheduler,
            rollouts,
            dispatcher,
            health,
        }
    }

    /// Restore persisted state and build the first capability snapshot.
    ///
    /// Must run before the workers start.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<Recovery, AutoEdgeError> {
        let circuits = self.circuits.load().await?;
        let kill_switch = self.rollouts.load().await?;
        let recovery = self.queue.recover().await?;
        let graph = self.refresh_capabilities().await;
        tracing::info!(
            circuits,
            kill_switch = kill_switch.engaged,
            requeued = recovery.requeued,
            waiting = recovery.waiting,
            graph_version = graph.version,
            stale = graph.stale,
            "engine state restored"
        );
        Ok(recovery)
    }

    /// Rebuild the capability graph and announce the new snapshot.
    pub async fn refresh_capabilities(&self) -> Arc<CapabilityGraph> {
        let graph = self.graph.refresh().await;
        let event = Event::new(
            EventType::CapabilitiesRefreshed,
            None,
            serde_json::json!({
                "version": graph.version,
                "stale": graph.stale,
                "entities": graph.entities.len(),
                "services": graph.services.len(),
            }),
        );
        if let Err(err) = self.events.publish(event).await {
            tracing::debug!(error = %err, "capability event not delivered");
        }
        graph
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn health_report(&self) -> Result<HealthReport, AutoEdgeError> {
        let incidents = self.health.incidents();
        Ok(HealthReport {
            status: self.health.status(),
            kill_switch: self.rollouts.kill_switch().await?.engaged,
            queue_depth: self.queue.depth(),
            workers: self.settings.workers,
            halted_workers: incidents.len(),
            incidents,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::watch;

    use autoedge_domain::error::RolloutError;
    use autoedge_domain::id::SpecId;
    use autoedge_domain::rollout::RolloutStage;
    use autoedge_domain::spec::{StateChange, Trigger};
    use autoedge_domain::state::EntityState;
    use autoedge_domain::target::TargetRef;
    use autoedge_domain::task::{TaskFilter, TaskStatus};

    use super::*;
    use crate::execution::{ExecuteRequest, ExecutionMode, Submission};
    use crate::health::HealthStatus;
    use crate::ports::TaskStore;
    use crate::testing::{FakeRemote, InMemoryStorage, ManualClock, document, turn_on};

    type TestAgent = Agent<InMemoryStorage, FakeRemote, ManualClock>;

    struct Fixture {
        agent: Arc<TestAgent>,
        store: Arc<InMemoryStorage>,
        remote: Arc<FakeRemote>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStorage::default());
        let remote = Arc::new(FakeRemote::home());
        let settings = EngineSettings {
            workers: 2,
            refresh_attempts: 1,
            refresh_retry_delay: Duration::ZERO,
            ..EngineSettings::default()
        };
        let agent = Arc::new(Agent::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::new(ManualClock::default()),
            Arc::new(InProcessEventBus::default()),
            settings,
        ));
        agent.start().await.unwrap();
        Fixture {
            agent,
            store,
            remote,
        }
    }

    impl Fixture {
        async fn deployed(&self, trigger: Trigger, entity_id: &str) -> SpecId {
            let spec = self
                .agent
                .specs
                .create(document("spec", trigger, vec![turn_on(entity_id)]))
                .await
                .unwrap();
            self.agent.rollouts.deploy(spec.id, 1).await.unwrap();
            spec.id
        }

        async fn queued(&self, spec_id: SpecId) -> Submission {
            self.agent
                .execution
                .submit(spec_id, ExecuteRequest::default())
                .await
                .unwrap()
        }
    }

    fn motion_on(event_id: &str) -> StateChange {
        StateChange {
            event_id: event_id.to_string(),
            entity_id: "binary_sensor.motion".to_string(),
            from: Some(EntityState::Off),
            to: EntityState::On,
            fired_at: None,
        }
    }

    fn motion_trigger() -> Trigger {
        Trigger::StateChanged {
            target: TargetRef::entity("binary_sensor.motion"),
            from: None,
            to: Some(EntityState::On),
        }
    }

    #[tokio::test]
    async fn should_route_state_change_once_per_event() {
        let f = fixture().await;
        let spec_id = f.deployed(motion_trigger(), "light.hall").await;
        f.deployed(Trigger::Manual, "switch.fan").await;

        let first = f.agent.router.route(&motion_on("evt-1")).await.unwrap();
        let again = f.agent.router.route(&motion_on("evt-1")).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].spec_id, spec_id);
        assert!(!first[0].replayed);
        assert!(again[0].replayed);
        assert_eq!(first[0].task_id, again[0].task_id);
        assert_eq!(f.agent.queue.depth(), 1);
    }

    #[tokio::test]
    async fn should_ignore_events_no_trigger_watches() {
        let f = fixture().await;
        f.deployed(motion_trigger(), "light.hall").await;
        let mut event = motion_on("evt-2");
        event.to = EntityState::Off;

        let routed = f.agent.router.route(&event).await.unwrap();

        assert!(routed.is_empty());
        assert_eq!(f.agent.queue.depth(), 0);
    }

    #[tokio::test]
    async fn should_split_traffic_during_canary_and_roll_back() {
        let f = fixture().await;
        let spec_id = f.deployed(Trigger::Manual, "light.hall").await;
        f.agent
            .specs
            .update(spec_id, document("spec", Trigger::Manual, vec![turn_on("switch.fan")]))
            .await
            .unwrap();

        let canary = f.agent.rollouts.set_canary(spec_id, 50).await.unwrap();
        assert_eq!(canary.stage, RolloutStage::Canary { percentage: 50 });
        assert_eq!(canary.active_version, 2);
        let mut versions = std::collections::BTreeSet::new();
        for n in 0..64 {
            let version = f
                .agent
                .rollouts
                .route(spec_id, &format!("event:{n}"))
                .await
                .unwrap();
            versions.insert(version);
        }
        assert_eq!(versions.into_iter().collect::<Vec<_>>(), vec![1, 2]);

        let rolled_back = f.agent.rollouts.rollback(spec_id).await.unwrap();
        assert_eq!(rolled_back.active_version, 1);
        assert_eq!(rolled_back.stage, RolloutStage::Full);
        for n in 0..16 {
            let version = f
                .agent
                .rollouts
                .route(spec_id, &format!("event:{n}"))
                .await
                .unwrap();
            assert_eq!(version, 1);
        }
    }

    #[tokio::test]
    async fn should_refuse_promotion_without_canary() {
        let f = fixture().await;
        let spec_id = f.deployed(Trigger::Manual, "light.hall").await;

        let err = f.agent.rollouts.promote(spec_id).await.unwrap_err();

        assert!(matches!(
            err,
            AutoEdgeError::Rollout(RolloutError::NotInCanary { .. })
        ));
    }

    #[tokio::test]
    async fn should_cancel_queue_and_refuse_work_under_kill_switch() {
        let f = fixture().await;
        let spec_id = f.deployed(Trigger::Manual, "light.hall").await;
        for _ in 0..3 {
            f.queued(spec_id).await;
        }

        let cancelled = f.agent.rollouts.pause().await.unwrap();

        assert_eq!(cancelled.len(), 3);
        assert_eq!(f.agent.queue.depth(), 0);
        let tasks = f.store.list_tasks(&TaskFilter::default()).await.unwrap();
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Cancelled));
        assert!(f.agent.health_report().await.unwrap().kill_switch);

        let while_paused = f.queued(spec_id).await;
        assert_eq!(while_paused.task().status, TaskStatus::Pending);

        f.agent.rollouts.resume().await.unwrap();
        let (_tx, rx) = watch::channel(false);
        let handles = f.agent.dispatcher.spawn(1, &rx);
        let task_id = while_paused.task().id;
        let finished = wait_for_status(&f.agent, task_id, TaskStatus::Succeeded).await;
        assert!(finished);
        assert_eq!(f.remote.call_count(), 1);
        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn should_drain_queue_with_worker_pool() {
        let f = fixture().await;
        let spec_id = f.deployed(Trigger::Manual, "light.hall").await;
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(f.queued(spec_id).await.task().id);
        }

        let (tx, rx) = watch::channel(false);
        let handles = f.agent.dispatcher.spawn(2, &rx);
        for id in &ids {
            assert!(wait_for_status(&f.agent, *id, TaskStatus::Succeeded).await);
        }
        tx.send_replace(true);
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(f.remote.call_count(), 5);
        assert!(f.remote.max_in_flight() <= 2);
        assert_eq!(f.agent.health.status(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn should_degrade_health_when_storage_fails_under_a_worker() {
        let f = fixture().await;
        let spec_id = f.deployed(Trigger::Manual, "light.hall").await;
        f.queued(spec_id).await;
        f.store.break_task_updates();

        let (_tx, rx) = watch::channel(false);
        let handles = f.agent.dispatcher.spawn(1, &rx);
        for handle in handles {
            handle.await.unwrap();
        }

        let report = f.agent.health_report().await.unwrap();
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.halted_workers, 1);
    }

    #[tokio::test]
    async fn should_cancel_queued_task_of_rolled_back_version() {
        let f = fixture().await;
        let spec_id = f.deployed(Trigger::Manual, "light.hall").await;
        f.agent
            .specs
            .update(spec_id, document("spec", Trigger::Manual, vec![turn_on("switch.fan")]))
            .await
            .unwrap();
        f.agent.rollouts.deploy(spec_id, 2).await.unwrap();
        let queued = f.queued(spec_id).await;
        assert_eq!(queued.task().spec_version, 2);

        f.agent.rollouts.rollback(spec_id).await.unwrap();
        let (_tx, rx) = watch::channel(false);
        let handles = f.agent.dispatcher.spawn(1, &rx);
        let cancelled = wait_for_status(&f.agent, queued.task().id, TaskStatus::Cancelled).await;
        for handle in handles {
            handle.abort();
        }

        assert!(cancelled);
        assert_eq!(f.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn should_refuse_sync_execution_of_paused_spec() {
        let f = fixture().await;
        let spec_id = f.deployed(Trigger::Manual, "light.hall").await;
        f.agent.rollouts.pause_spec(spec_id).await.unwrap();

        let err = f
            .agent
            .execution
            .submit(spec_id, ExecuteRequest {
                mode: ExecutionMode::Sync,
                ..ExecuteRequest::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, AutoEdgeError::Rollout(RolloutError::Paused { .. })));
    }

    async fn wait_for_status(
        agent: &TestAgent,
        task_id: autoedge_domain::id::TaskId,
        status: TaskStatus,
    ) -> bool {
        for _ in 0..200 {
            if agent.queue.status(task_id).await.is_ok_and(|t| t.status == status) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }
}
