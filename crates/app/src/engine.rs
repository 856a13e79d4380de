//! Execution engine — runs one claimed task to a terminal status.
//!
//! The engine checks rollout routing, admits the plan's targets through
//! their circuit breakers, evaluates the plan's conditions, then invokes
//! each step. Retryable failures are retried with backoff; calls already
//! applied (according to the execution record) are never repeated.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use autoedge_domain::error::{AutoEdgeError, CircuitOpenError, RemoteError, RemoteErrorKind};
use autoedge_domain::event::{Event, EventType};
use autoedge_domain::id::TaskId;
use autoedge_domain::plan::{PlanStep, ResolvedCall};
use autoedge_domain::record::{Decision, ExecutionRecord};
use autoedge_domain::retry::{RetryDecision, RetryPolicy};
use autoedge_domain::spec::{Condition, time_range_contains};
use autoedge_domain::state::EntityState;
use autoedge_domain::task::{
    EffectStatus, Failure, FailureKind, Outcome, TargetEffect, Task, TaskResult, TaskStatus,
};

use crate::circuits::{CircuitRegistry, CircuitTransition};
use crate::event_bus::InProcessEventBus;
use crate::ports::{Clock, EventPublisher, RemotePlatform, Storage};
use crate::records;

/// A task after the engine is done with it.
#[derive(Debug, Clone)]
pub struct Executed {
    pub task: Task,
    /// Set when an open breaker refused the remaining calls.
    pub refused: Option<CircuitOpenError>,
}

enum AttemptOutcome {
    Completed,
    Cancelled,
    Failed {
        step: usize,
        call: ResolvedCall,
        error: RemoteError,
    },
}

/// Progress of one task across attempts.
struct Progress {
    record: ExecutionRecord,
    applied: BTreeSet<usize>,
    states: BTreeMap<usize, EntityState>,
    failed_step: Option<usize>,
}

pub struct ExecutionEngine<S, R, C> {
    store: Arc<S>,
    remote: Arc<R>,
    clock: Arc<C>,
    circuits: Arc<CircuitRegistry<S>>,
    events: Arc<InProcessEventBus>,
    retry: RetryPolicy,
    call_timeout: Duration,
    running: Mutex<HashMap<TaskId, watch::Sender<bool>>>,
}

impl<S, R, C> ExecutionEngine<S, R, C>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    pub fn new(
        store: Arc<S>,
        remote: Arc<R>,
        clock: Arc<C>,
        circuits: Arc<CircuitRegistry<S>>,
        events: Arc<InProcessEventBus>,
        retry: RetryPolicy,
        call_timeout: Duration,
    ) -> Self {
        Self {
            store,
            remote,
            clock,
            circuits,
            events,
            retry,
            call_timeout,
            running: Mutex::new(HashMap::new()),
        }
    }

    fn running(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, watch::Sender<bool>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask a running task to stop; it stops at its next checkpoint.
    ///
    /// Returns `false` when the task is not running on this engine.
    pub fn cancel_running(&self, task_id: TaskId) -> bool {
        match self.running().get(&task_id) {
            Some(sender) => {
                sender.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Run a task already claimed (status `Running`).
    ///
    /// # Errors
    ///
    /// Returns storage errors and impossible transitions; remote failures
    /// are reported in the task result instead.
    #[tracing::instrument(
        skip(self, task),
        fields(task_id = %task.id, spec_id = %task.spec_id, version = task.spec_version)
    )]
    pub async fn run(&self, task: Task) -> Result<Executed, AutoEdgeError> {
        let task_id = task.id;
        let (sender, receiver) = watch::channel(false);
        self.running().insert(task_id, sender);
        let result = self.execute(task, receiver).await;
        self.running().remove(&task_id);
        result
    }

    async fn execute(
        &self,
        mut task: Task,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<Executed, AutoEdgeError> {
        let record = records::load_for(&*self.store, &task, self.clock.now()).await?;
        let mut progress = Progress {
            applied: record.applied_steps(),
            record,
            states: BTreeMap::new(),
            failed_step: None,
        };

        if let Some(rollout) = self.store.get_rollout(task.spec_id).await?
            && !rollout.is_routable(task.spec_version)
        {
            let reason = if rollout.is_paused() {
                "rollout paused"
            } else {
                "version retired"
            };
            tracing::info!(reason, "task cancelled at dispatch");
            let failure = Failure {
                kind: FailureKind::VersionRetired,
                message: reason.to_string(),
                target: None,
            };
            self.note(
                &mut progress,
                Decision::Cancelled {
                    reason: reason.to_string(),
                },
            )
            .await?;
            return self
                .finish(task, progress, TaskStatus::Cancelled, Outcome::Cancelled, Some(failure))
                .await
                .map(done);
        }

        let mut attempt = progress.record.attempts();
        let mut conditions_checked = progress
            .record
            .entries
            .iter()
            .any(|entry| matches!(entry.decision, Decision::ConditionsEvaluated { passed: true, .. }));

        loop {
            if *cancel.borrow() {
                return self.cancelled(task, progress).await.map(done);
            }

            let pending = pending_targets(&task, &progress.applied);
            match self.circuits.admit_all(&pending, self.clock.now()).await {
                Ok(transitions) => self.announce_circuits(transitions).await,
                Err(AutoEdgeError::CircuitOpen(refusal)) => {
                    tracing::warn!(circuit = %refusal.target, "circuit open, call refused");
                    self.note(
                        &mut progress,
                        Decision::CircuitRejected {
                            target: refusal.target.clone(),
                        },
                    )
                    .await?;
                    let failure = Failure {
                        kind: FailureKind::CircuitOpen,
                        message: refusal.to_string(),
                        target: refusal.target.parse().ok(),
                    };
                    let task = self
                        .finish(task, progress, TaskStatus::Failed, Outcome::Failed, Some(failure))
                        .await?;
                    return Ok(Executed {
                        task,
                        refused: Some(refusal),
                    });
                }
                Err(err) => return Err(err),
            }

            if !conditions_checked {
                let unmet = self.evaluate_conditions(task.plan.conditions()).await;
                self.note(
                    &mut progress,
                    Decision::ConditionsEvaluated {
                        passed: unmet.is_none(),
                        reason: unmet.clone(),
                    },
                )
                .await?;
                if let Some(reason) = unmet {
                    self.circuits.release(&pending).await?;
                    tracing::info!(%reason, "conditions not met, skipping");
                    return self
                        .finish(task, progress, TaskStatus::Succeeded, Outcome::Skipped { reason }, None)
                        .await
                        .map(done);
                }
                conditions_checked = true;
            }

            if task.dry_run {
                self.circuits.release(&pending).await?;
                let effects = effects(&task, &progress, EffectStatus::WouldApply);
                self.note(&mut progress, Decision::DryRun { effects }).await?;
                return self
                    .finish(task, progress, TaskStatus::Succeeded, Outcome::DryRun, None)
                    .await
                    .map(done);
            }

            attempt += 1;
            task.attempt_count = attempt;
            task.updated_at = self.clock.now();
            self.store.update_task(&task).await?;

            let outcome = self
                .attempt(&task, attempt, &mut progress, &mut cancel)
                .await;
            self.circuits.release(&pending).await?;
            match outcome? {
                AttemptOutcome::Completed => {
                    return self
                        .finish(task, progress, TaskStatus::Succeeded, Outcome::Applied, None)
                        .await
                        .map(done);
                }
                AttemptOutcome::Cancelled => {
                    return self.cancelled(task, progress).await.map(done);
                }
                AttemptOutcome::Failed { step, call, error } => {
                    match self.retry.decide(attempt, &error) {
                        RetryDecision::RetryAfter(delay) => {
                            tracing::info!(attempt, delay_ms = delay.as_millis(), error = %error, "retrying");
                            self.note(
                                &mut progress,
                                Decision::RetryScheduled {
                                    attempt,
                                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                },
                            )
                            .await?;
                            tokio::select! {
                                () = self.clock.sleep(delay) => {}
                                () = cancelled(&mut cancel) => {}
                            }
                        }
                        RetryDecision::GiveUp => {
                            tracing::warn!(attempt, error = %error, "giving up");
                            progress.failed_step = Some(step);
                            let failure = Failure {
                                kind: error.kind.into(),
                                message: error.message,
                                target: Some(call.target),
                            };
                            return self
                                .finish(task, progress, TaskStatus::Failed, Outcome::Failed, Some(failure))
                                .await
                                .map(done);
                        }
                    }
                }
            }
        }
    }

    async fn attempt(
        &self,
        task: &Task,
        attempt: u32,
        progress: &mut Progress,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<AttemptOutcome, AutoEdgeError> {
        for (index, step) in task.plan.steps().iter().enumerate() {
            if progress.applied.contains(&index) {
                continue;
            }
            match step {
                PlanStep::Wait { seconds } => {
                    if progress.applied.iter().any(|applied| *applied > index) {
                        continue;
                    }
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(*seconds)) => {}
                        () = cancelled(cancel) => return Ok(AttemptOutcome::Cancelled),
                    }
                }
                PlanStep::Invoke(call) => {
                    if *cancel.borrow() {
                        return Ok(AttemptOutcome::Cancelled);
                    }
                    let result = tokio::select! {
                        result = tokio::time::timeout(self.call_timeout, self.remote.invoke(call)) => {
                            result.unwrap_or_else(|_| Err(RemoteError::new(
                                RemoteErrorKind::Timeout,
                                format!("no answer within {}ms", self.call_timeout.as_millis()),
                            )))
                        }
                        () = cancelled(cancel) => return Ok(AttemptOutcome::Cancelled),
                    };
                    let target = call.target.to_string();
                    match result {
                        Ok(outcome) => {
                            progress.applied.insert(index);
                            if let Some(state) = outcome.resulting_state {
                                progress.states.insert(index, state);
                            }
                            self.note(progress, attempt_decision(attempt, index, call, None))
                                .await?;
                            let transition = self.circuits.record_success(&target).await?;
                            self.announce_circuits(transition).await;
                            tracing::debug!(%call, "call applied");
                        }
                        Err(error) => {
                            self.note(
                                progress,
                                attempt_decision(attempt, index, call, Some(error.clone())),
                            )
                            .await?;
                            let transition = self
                                .circuits
                                .record_failure(&target, self.clock.now())
                                .await?;
                            self.announce_circuits(transition).await;
                            tracing::debug!(%call, error = %error, "call failed");
                            return Ok(AttemptOutcome::Failed {
                                step: index,
                                call: call.clone(),
                                error,
                            });
                        }
                    }
                }
            }
        }
        Ok(AttemptOutcome::Completed)
    }

    /// The reason the first unmet condition fails, if any.
    async fn evaluate_conditions(&self, conditions: &[Condition]) -> Option<String> {
        for condition in conditions {
            match condition {
                Condition::StateIs { target, state } => {
                    let Some(entity_id) = target.entity_id() else {
                        return Some(format!("{target} has no state"));
                    };
                    let fetched =
                        tokio::time::timeout(self.call_timeout, self.remote.entity_state(entity_id))
                            .await;
                    match fetched {
                        Ok(Ok(actual)) if actual == *state => {}
                        Ok(Ok(actual)) => {
                            return Some(format!("{target} is {actual}, expected {state}"));
                        }
                        Ok(Err(err)) => return Some(format!("could not read {target}: {err}")),
                        Err(_) => return Some(format!("could not read {target}: timed out")),
                    }
                }
                Condition::TimeRange { after, before } => {
                    let now = self.clock.now().format("%H:%M").to_string();
                    if !time_range_contains(after, before, &now) {
                        return Some(format!("{now} is outside {after}-{before}"));
                    }
                }
            }
        }
        None
    }

    async fn cancelled(&self, task: Task, mut progress: Progress) -> Result<Task, AutoEdgeError> {
        let reason = "cancelled by request";
        self.note(
            &mut progress,
            Decision::Cancelled {
                reason: reason.to_string(),
            },
        )
        .await?;
        let failure = Failure {
            kind: FailureKind::Cancelled,
            message: reason.to_string(),
            target: None,
        };
        self.finish(task, progress, TaskStatus::Cancelled, Outcome::Cancelled, Some(failure))
            .await
    }

    async fn finish(
        &self,
        mut task: Task,
        mut progress: Progress,
        status: TaskStatus,
        outcome: Outcome,
        failure: Option<Failure>,
    ) -> Result<Task, AutoEdgeError> {
        let now = self.clock.now();
        let effects = match outcome {
            Outcome::DryRun => effects(&task, &progress, EffectStatus::WouldApply),
            _ => effects(&task, &progress, EffectStatus::NotAttempted),
        };
        task.finish(
            status,
            TaskResult {
                outcome,
                effects,
                failure,
                finished_at: now,
            },
            now,
        )?;
        self.store.update_task(&task).await?;
        self.note(&mut progress, Decision::Finished { status }).await?;
        if let Err(err) = self.events.publish(records::task_event(&task)).await {
            tracing::debug!(error = %err, "task event not delivered");
        }
        tracing::info!(status = %status, attempts = task.attempt_count, "task finished");
        Ok(task)
    }

    async fn note(&self, progress: &mut Progress, decision: Decision) -> Result<(), AutoEdgeError> {
        progress.record.push(decision, self.clock.now());
        self.store.save_record(&progress.record).await
    }

    async fn announce_circuits(&self, transitions: impl IntoIterator<Item = CircuitTransition>) {
        for transition in transitions {
            tracing::info!(
                circuit = %transition.target,
                from = transition.from.as_str(),
                to = transition.to.as_str(),
                "circuit state changed"
            );
            let event = Event::new(
                EventType::CircuitStateChanged,
                Some(transition.target.clone()),
                serde_json::json!({
                    "from": transition.from.as_str(),
                    "to": transition.to.as_str(),
                }),
            );
            if let Err(err) = self.events.publish(event).await {
                tracing::debug!(error = %err, "circuit event not delivered");
            }
        }
    }
}

fn done(task: Task) -> Executed {
    Executed {
        task,
        refused: None,
    }
}

/// Resolves once cancellation is requested; never if the sender is gone.
async fn cancelled(receiver: &mut watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn pending_targets(task: &Task, applied: &BTreeSet<usize>) -> Vec<String> {
    let mut targets = Vec::new();
    for (index, call) in task.plan.invocations() {
        let target = call.target.to_string();
        if !applied.contains(&index) && !targets.contains(&target) {
            targets.push(target);
        }
    }
    targets
}

fn attempt_decision(
    attempt: u32,
    step: usize,
    call: &ResolvedCall,
    error: Option<RemoteError>,
) -> Decision {
    Decision::Attempt {
        attempt,
        step,
        target: call.target.clone(),
        service: call.service.clone(),
        success: error.is_none(),
        error,
    }
}

/// Per-call effects; calls neither applied nor failed get `unreached`.
fn effects(task: &Task, progress: &Progress, unreached: EffectStatus) -> Vec<TargetEffect> {
    task.plan
        .invocations()
        .map(|(index, call)| {
            let status = if progress.applied.contains(&index) {
                EffectStatus::Applied
            } else if progress.failed_step == Some(index) {
                EffectStatus::Failed
            } else {
                unreached
            };
            TargetEffect {
                target: call.target.clone(),
                service: call.service.clone(),
                status,
                resulting_state: progress.states.get(&index).cloned(),
            }
        })
        .collect()
}
