//! Execution requests — idempotency, routing, planning and hand-off to the
//! engine (synchronous) or the queue (queued).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use autoedge_domain::error::{AutoEdgeError, NotFoundError, RolloutError, SpecRejection};
use autoedge_domain::id::{CorrelationId, SpecId, TaskId};
use autoedge_domain::planner;
use autoedge_domain::policy::PolicyConfig;
use autoedge_domain::record::{Decision, ExecutionRecord};
use autoedge_domain::task::{
    IdempotencyKey, Priority, Task, TaskFilter, TaskOptions, TaskStatus,
};
use autoedge_domain::time::{self, Timestamp};

use crate::capabilities::CapabilityGraphBuilder;
use crate::engine::ExecutionEngine;
use crate::locks::KeyedLocks;
use crate::ports::{Clock, RemotePlatform, Storage};
use crate::queue::TaskQueue;
use crate::records;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Run now and return the result inline.
    Sync,
    /// Enqueue and return the task right away.
    #[default]
    Queued,
}

/// Parameters of one execution request.
#[derive(Debug, Clone, Default)]
pub struct ExecuteRequest {
    pub mode: ExecutionMode,
    /// Used verbatim when given.
    pub idempotency_key: Option<String>,
    /// What fired the request, e.g. `event:<id>` or `cron:<spec>:<time>`.
    pub trigger_identity: Option<String>,
    pub delay: Option<Duration>,
    /// Absolute eta; wins over `delay`.
    pub eta: Option<Timestamp>,
    pub priority: Option<Priority>,
    pub dry_run: bool,
}

/// How a request was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Ran synchronously to a terminal status.
    Completed(Task),
    /// Accepted into the queue.
    Queued(Task),
    /// A task with the same idempotency key already exists.
    Replayed(Task),
}

impl Submission {
    #[must_use]
    pub fn task(&self) -> &Task {
        match self {
            Self::Completed(task) | Self::Queued(task) | Self::Replayed(task) => task,
        }
    }

    #[must_use]
    pub fn into_task(self) -> Task {
        match self {
            Self::Completed(task) | Self::Queued(task) | Self::Replayed(task) => task,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The task had not started and is now cancelled.
    Cancelled,
    /// The task is running; it stops at its next checkpoint.
    CancelRequested,
    AlreadyFinished,
}

pub struct ExecutionService<S, R, C> {
    store: Arc<S>,
    graph: Arc<CapabilityGraphBuilder<R, C>>,
    queue: Arc<TaskQueue<S, C>>,
    engine: Arc<ExecutionEngine<S, R, C>>,
    clock: Arc<C>,
    policy: PolicyConfig,
    retention: Duration,
    locks: KeyedLocks,
}

impl<S, R, C> ExecutionService<S, R, C>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    pub fn new(
        store: Arc<S>,
        graph: Arc<CapabilityGraphBuilder<R, C>>,
        queue: Arc<TaskQueue<S, C>>,
        engine: Arc<ExecutionEngine<S, R, C>>,
        clock: Arc<C>,
        policy: PolicyConfig,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            graph,
            queue,
            engine,
            clock,
            policy,
            retention,
            locks: KeyedLocks::default(),
        }
    }

    /// Request an execution of the routed version of a deployed spec.
    ///
    /// Requests sharing an idempotency key are serialized; every request
    /// after the first resolves to the first one's task.
    ///
    /// # Errors
    ///
    /// - [`AutoEdgeError::Rollout`] when the spec is not deployed or paused
    /// - [`AutoEdgeError::Rejected`] when planning fails (a record is kept)
    /// - [`AutoEdgeError::QueueSaturated`] above the high-water mark
    /// - [`AutoEdgeError::CircuitOpen`] when a synchronous run is refused
    ///   without any call
    /// - storage errors
    #[tracing::instrument(skip(self, request), fields(mode = ?request.mode, dry_run = request.dry_run))]
    pub async fn submit(
        &self,
        spec_id: SpecId,
        request: ExecuteRequest,
    ) -> Result<Submission, AutoEdgeError> {
        let identity = request
            .trigger_identity
            .clone()
            .unwrap_or_else(|| format!("manual:{}", CorrelationId::new()));
        let key = match &request.idempotency_key {
            Some(key) => IdempotencyKey::explicit(key.clone()),
            None => IdempotencyKey::derive(spec_id, &identity),
        };
        let key = if request.dry_run {
            key.for_dry_run()
        } else {
            key
        };

        let _guard = self.locks.lock(key.as_str()).await;
        let now = self.clock.now();
        let since = time::before(now, self.retention);
        if let Some(existing) = self.store.find_task_by_key(&key, since).await? {
            tracing::info!(task_id = %existing.id, key = %key, "idempotent replay");
            records::append(
                &*self.store,
                &existing,
                [Decision::IdempotentReplay {
                    task_id: existing.id,
                }],
                now,
            )
            .await?;
            return Ok(Submission::Replayed(existing));
        }

        let rollout = self.store.get_rollout(spec_id).await?.ok_or_else(|| {
            RolloutError::NotDeployed {
                spec_id: spec_id.to_string(),
            }
        })?;
        let version = rollout.route(&identity).ok_or_else(|| RolloutError::Paused {
            spec_id: spec_id.to_string(),
        })?;
        let spec = self
            .store
            .get_spec_version(spec_id, version)
            .await?
            .ok_or_else(|| NotFoundError {
                entity: "Spec",
                id: format!("{spec_id} v{version}"),
            })?;

        let correlation_id = CorrelationId::new();
        let mut record = ExecutionRecord::new(correlation_id, spec_id, now);
        record.spec_version = Some(version);
        let graph = self.graph.snapshot();
        let plan = match planner::plan(&spec, &graph, &self.policy) {
            Ok(plan) => plan,
            Err(errors) => {
                tracing::info!(errors = errors.len(), "execution rejected");
                record.push(
                    Decision::Validated {
                        passed: false,
                        errors: errors.clone(),
                    },
                    now,
                );
                self.store.save_record(&record).await?;
                return Err(SpecRejection {
                    errors,
                    correlation_id: Some(correlation_id),
                }
                .into());
            }
        };
        record.push(
            Decision::Validated {
                passed: true,
                errors: Vec::new(),
            },
            now,
        );
        record.push(
            Decision::TargetsResolved {
                targets: plan.targets(),
            },
            now,
        );

        let not_before = request
            .eta
            .or_else(|| request.delay.map(|delay| time::after(now, delay)));
        let task = Task::from_plan(
            plan,
            TaskOptions {
                idempotency_key: key,
                trigger_identity: identity,
                correlation_id,
                priority: request.priority.unwrap_or_default(),
                not_before,
                dry_run: request.dry_run,
            },
            now,
        );
        record.task_id = Some(task.id);

        self.store.save_record(&record).await?;

        let run_now =
            request.mode == ExecutionMode::Sync && task.is_due(now) && !self.queue.is_paused();
        if !run_now {
            let task = self.queue.enqueue(task).await?;
            return Ok(Submission::Queued(task));
        }

        let task = self.queue.register(task).await?;
        let Some(claimed) = self.queue.claim_registered(task.id).await? else {
            return Ok(Submission::Queued(self.hand_back(task.id).await?));
        };
        let executed = self.engine.run(claimed).await?;
        if let Some(refusal) = executed.refused
            && executed.task.attempt_count == 0
        {
            return Err(refusal.into());
        }
        Ok(Submission::Completed(executed.task))
    }

    /// Give a task the caller failed to claim back to the workers.
    ///
    /// A pause in the meantime may already have cancelled it; only a task
    /// that is still waiting goes into the index.
    async fn hand_back(&self, task_id: TaskId) -> Result<Task, AutoEdgeError> {
        let stored = self.queue.status(task_id).await?;
        if stored.status.is_waiting() {
            self.queue.adopt(&stored);
        }
        Ok(stored)
    }

    /// Cancel a task: outright when waiting, cooperatively when running.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] for an unknown id.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_task(&self, task_id: TaskId) -> Result<CancelOutcome, AutoEdgeError> {
        if self.queue.cancel(task_id, "cancelled by request").await? {
            return Ok(CancelOutcome::Cancelled);
        }
        let task = self.queue.status(task_id).await?;
        if task.status == TaskStatus::Running && self.engine.cancel_running(task_id) {
            return Ok(CancelOutcome::CancelRequested);
        }
        Ok(CancelOutcome::AlreadyFinished)
    }

    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] for an unknown id.
    pub async fn get_task(&self, task_id: TaskId) -> Result<Task, AutoEdgeError> {
        self.queue.status(task_id).await
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, AutoEdgeError> {
        self.queue.list(filter).await
    }

    /// The decision trace of a correlation id.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] when the record is unknown or evicted.
    pub async fn explain(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<ExecutionRecord, AutoEdgeError> {
        self.store.get_record(correlation_id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "ExecutionRecord",
                id: correlation_id.to_string(),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use autoedge_domain::capability::CapabilityGraph;
    use autoedge_domain::circuit::CircuitPolicy;
    use autoedge_domain::error::{RemoteErrorKind, ValidationError};
    use autoedge_domain::retry::RetryPolicy;
    use autoedge_domain::rollout::RolloutState;
    use autoedge_domain::spec::{AutomationSpec, Trigger};
    use autoedge_domain::task::Outcome;

    use super::*;
    use crate::circuits::CircuitRegistry;
    use crate::event_bus::InProcessEventBus;
    use crate::ports::{RolloutStore, SpecRepository};
    use crate::testing::{FakeRemote, InMemoryStorage, ManualClock, turn_on};

    struct Fixture {
        service: Arc<ExecutionService<InMemoryStorage, FakeRemote, ManualClock>>,
        store: Arc<InMemoryStorage>,
        remote: Arc<FakeRemote>,
        queue: Arc<TaskQueue<InMemoryStorage, ManualClock>>,
        clock: Arc<ManualClock>,
    }

    async fn fixture(circuit: CircuitPolicy) -> Fixture {
        let store = Arc::new(InMemoryStorage::default());
        let remote = Arc::new(FakeRemote::home());
        let clock = Arc::new(ManualClock::default());
        let events = Arc::new(InProcessEventBus::default());
        let graph = Arc::new(CapabilityGraphBuilder::new(
            Arc::clone(&remote),
            Arc::clone(&clock),
            1,
            Duration::ZERO,
        ));
        graph.refresh().await;
        let queue = Arc::new(TaskQueue::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            Arc::clone(&events),
            100,
        ));
        let circuits = Arc::new(CircuitRegistry::new(Arc::clone(&store), circuit));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&clock),
            circuits,
            events,
            RetryPolicy::default(),
            Duration::from_secs(5),
        ));
        let service = Arc::new(ExecutionService::new(
            Arc::clone(&store),
            graph,
            Arc::clone(&queue),
            engine,
            Arc::clone(&clock),
            PolicyConfig::default(),
            Duration::from_secs(3600),
        ));
        Fixture {
            service,
            store,
            remote,
            queue,
            clock,
        }
    }

    impl Fixture {
        async fn deploy(&self, entity_id: &str) -> SpecId {
            let spec = AutomationSpec::builder()
                .name(entity_id)
                .trigger(Trigger::Manual)
                .action(turn_on(entity_id))
                .build()
                .unwrap();
            self.store.insert_spec_version(&spec).await.unwrap();
            self.store
                .save_rollout(&RolloutState::deployed(spec.id, 1, None, self.clock.now()))
                .await
                .unwrap();
            spec.id
        }
    }

    impl Fixture {
        async fn registered(&self, entity_id: &str) -> Task {
            let spec = AutomationSpec::builder()
                .name(entity_id)
                .trigger(Trigger::Manual)
                .action(turn_on(entity_id))
                .build()
                .unwrap();
            let inventory = self.remote.inventory().await.unwrap();
            let graph = CapabilityGraph::from_inventory(1, self.clock.now(), inventory);
            let plan = planner::plan(&spec, &graph, &PolicyConfig::default()).unwrap();
            let task = Task::from_plan(
                plan,
                TaskOptions {
                    idempotency_key: IdempotencyKey::derive(spec.id, "manual:test"),
                    trigger_identity: "manual:test".to_string(),
                    correlation_id: CorrelationId::new(),
                    priority: Priority::default(),
                    not_before: None,
                    dry_run: false,
                },
                self.clock.now(),
            );
            self.queue.register(task).await.unwrap()
        }
    }

    fn sync_with_key(key: &str) -> ExecuteRequest {
        ExecuteRequest {
            mode: ExecutionMode::Sync,
            idempotency_key: Some(key.to_string()),
            ..ExecuteRequest::default()
        }
    }

    #[tokio::test]
    async fn should_execute_synchronously_and_record_the_run() {
        let f = fixture(CircuitPolicy::default()).await;
        let spec_id = f.deploy("light.kitchen_light").await;

        let submission = f
            .service
            .submit(spec_id, ExecuteRequest {
                mode: ExecutionMode::Sync,
                ..ExecuteRequest::default()
            })
            .await
            .unwrap();

        let Submission::Completed(task) = submission else {
            panic!("expected a completed run");
        };
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(f.remote.call_count(), 1);
        let record = f.service.explain(task.correlation_id).await.unwrap();
        assert_eq!(record.task_id, Some(task.id));
        assert_eq!(record.attempts(), 1);
        assert!(record.is_finished());
    }

    #[tokio::test]
    async fn should_collapse_concurrent_duplicates_into_one_call() {
        let f = fixture(CircuitPolicy::default()).await;
        let spec_id = f.deploy("light.kitchen_light").await;
        f.remote.set_call_delay(Duration::from_millis(20));

        let first = {
            let service = Arc::clone(&f.service);
            tokio::spawn(async move { service.submit(spec_id, sync_with_key("trigger-123")).await })
        };
        let second = {
            let service = Arc::clone(&f.service);
            tokio::spawn(async move { service.submit(spec_id, sync_with_key("trigger-123")).await })
        };
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        assert_eq!(f.remote.call_count(), 1);
        assert_eq!(first.task().id, second.task().id);
        assert_eq!(first.task().result, second.task().result);
        let replays = [&first, &second]
            .iter()
            .filter(|s| matches!(s, Submission::Replayed(_)))
            .count();
        assert_eq!(replays, 1);
    }

    #[tokio::test]
    async fn should_record_rejection_with_correlation_id() {
        let f = fixture(CircuitPolicy::default()).await;
        let spec_id = f.deploy("light.nonexistent").await;

        let err = f
            .service
            .submit(spec_id, ExecuteRequest::default())
            .await
            .unwrap_err();

        let AutoEdgeError::Rejected(rejection) = err else {
            panic!("expected rejection, got {err:?}");
        };
        assert_eq!(
            rejection.errors,
            vec![ValidationError::TargetUnavailable {
                reference: "entity:light.nonexistent".to_string()
            }]
        );
        let record = f
            .service
            .explain(rejection.correlation_id.unwrap())
            .await
            .unwrap();
        assert!(matches!(
            record.entries[0].decision,
            Decision::Validated { passed: false, .. }
        ));
        assert!(f.service.list_tasks(&TaskFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_fail_fast_once_circuit_is_open() {
        let f = fixture(CircuitPolicy {
            threshold: 3,
            cooldown: Duration::from_secs(30),
        })
        .await;
        let spec_id = f.deploy("light.kitchen_light").await;
        f.remote
            .fail_always("light.kitchen_light", RemoteErrorKind::Unavailable);

        let first = f.service.submit(spec_id, sync_with_key("a")).await.unwrap();
        assert_eq!(first.task().status, TaskStatus::Failed);
        let calls = f.remote.call_count();

        let err = f.service.submit(spec_id, sync_with_key("b")).await.unwrap_err();

        assert!(matches!(err, AutoEdgeError::CircuitOpen(_)));
        assert_eq!(f.remote.call_count(), calls);
    }

    #[tokio::test]
    async fn should_queue_delayed_requests() {
        let f = fixture(CircuitPolicy::default()).await;
        let spec_id = f.deploy("light.kitchen_light").await;

        let submission = f
            .service
            .submit(spec_id, ExecuteRequest {
                mode: ExecutionMode::Sync,
                delay: Some(Duration::from_secs(60)),
                ..ExecuteRequest::default()
            })
            .await
            .unwrap();

        let Submission::Queued(task) = submission else {
            panic!("expected a queued task");
        };
        assert_eq!(task.status, TaskStatus::Scheduled);
        assert_eq!(f.queue.depth(), 1);
        assert_eq!(f.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn should_refuse_undeployed_spec() {
        let f = fixture(CircuitPolicy::default()).await;
        let err = f
            .service
            .submit(SpecId::new(), ExecuteRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AutoEdgeError::Rollout(RolloutError::NotDeployed { .. })
        ));
    }

    #[tokio::test]
    async fn should_return_dry_run_effects_without_calling() {
        let f = fixture(CircuitPolicy::default()).await;
        let spec_id = f.deploy("light.kitchen_light").await;

        let submission = f
            .service
            .submit(spec_id, ExecuteRequest {
                mode: ExecutionMode::Sync,
                dry_run: true,
                ..ExecuteRequest::default()
            })
            .await
            .unwrap();

        let result = submission.task().result.clone().unwrap();
        assert_eq!(result.outcome, Outcome::DryRun);
        assert_eq!(f.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn should_run_trigger_for_real_after_its_dry_run() {
        let f = fixture(CircuitPolicy::default()).await;
        let spec_id = f.deploy("light.kitchen_light").await;
        let request = |dry_run| ExecuteRequest {
            mode: ExecutionMode::Sync,
            trigger_identity: Some("event:42".to_string()),
            dry_run,
            ..ExecuteRequest::default()
        };

        let dry = f.service.submit(spec_id, request(true)).await.unwrap();
        let real = f.service.submit(spec_id, request(false)).await.unwrap();
        let replayed = f.service.submit(spec_id, request(false)).await.unwrap();

        assert_eq!(dry.task().result.as_ref().unwrap().outcome, Outcome::DryRun);
        let Submission::Completed(real) = real else {
            panic!("expected a real run");
        };
        assert_eq!(real.status, TaskStatus::Succeeded);
        assert_ne!(real.id, dry.task().id);
        assert!(matches!(replayed, Submission::Replayed(ref task) if task.id == real.id));
        assert_eq!(f.remote.call_count(), 1);
    }

    #[tokio::test]
    async fn should_keep_explicit_key_free_for_real_run_after_dry_run() {
        let f = fixture(CircuitPolicy::default()).await;
        let spec_id = f.deploy("light.kitchen_light").await;

        let dry = f
            .service
            .submit(spec_id, ExecuteRequest {
                dry_run: true,
                ..sync_with_key("evening")
            })
            .await
            .unwrap();
        let real = f.service.submit(spec_id, sync_with_key("evening")).await.unwrap();

        assert!(matches!(dry, Submission::Completed(_)));
        assert!(matches!(real, Submission::Completed(_)));
        assert_eq!(f.remote.call_count(), 1);
    }

    #[tokio::test]
    async fn should_cancel_pending_task_but_not_finished_one() {
        let f = fixture(CircuitPolicy::default()).await;
        let spec_id = f.deploy("light.kitchen_light").await;
        let queued = f
            .service
            .submit(spec_id, ExecuteRequest::default())
            .await
            .unwrap();
        let done = f.service.submit(spec_id, sync_with_key("done")).await.unwrap();

        assert_eq!(
            f.service.cancel_task(queued.task().id).await.unwrap(),
            CancelOutcome::Cancelled
        );
        assert_eq!(
            f.service.cancel_task(done.task().id).await.unwrap(),
            CancelOutcome::AlreadyFinished
        );
        assert!(matches!(
            f.service.cancel_task(TaskId::new()).await.unwrap_err(),
            AutoEdgeError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn should_not_hand_back_task_cancelled_by_pause() {
        let f = fixture(CircuitPolicy::default()).await;
        let task = f.registered("light.kitchen_light").await;
        let cancelled = f.queue.pause("maintenance").await.unwrap();
        assert_eq!(cancelled, vec![task.id]);
        assert!(f.queue.claim_registered(task.id).await.unwrap().is_none());

        let stored = f.service.hand_back(task.id).await.unwrap();

        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert_eq!(f.queue.depth(), 0);
        f.queue.resume();
        assert_eq!(f.queue.depth(), 0);
        assert_eq!(f.service.get_task(task.id).await.unwrap().status, TaskStatus::Cancelled);
        assert_eq!(f.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn should_hand_back_task_still_waiting_when_claim_is_refused() {
        let f = fixture(CircuitPolicy::default()).await;
        let task = f.registered("light.kitchen_light").await;
        f.queue.set_paused(true);
        assert!(f.queue.claim_registered(task.id).await.unwrap().is_none());

        let stored = f.service.hand_back(task.id).await.unwrap();

        assert_eq!(stored.status, TaskStatus::Pending);
        assert_eq!(f.queue.depth(), 1);
    }
}
