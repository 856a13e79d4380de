//! Cron scheduler — turns due schedules into queued executions.
//!
//! The scheduler never calls the remote platform; it only submits tasks.
//! Each run is submitted with the trigger identity `cron:<spec_id>:<fire_time>`,
//! so a run submitted twice collapses through its idempotency key.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use autoedge_domain::error::{AutoEdgeError, NotFoundError, ValidationError};
use autoedge_domain::id::SpecId;
use autoedge_domain::schedule::Schedule;
use autoedge_domain::spec::AutomationSpec;
use autoedge_domain::time::Timestamp;

use crate::execution::{ExecuteRequest, ExecutionMode, ExecutionService};
use crate::ports::{Clock, RemotePlatform, Storage};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tick {
    pub submitted: usize,
    pub skipped: usize,
}

pub struct Scheduler<S, R, C> {
    store: Arc<S>,
    clock: Arc<C>,
    execution: Arc<ExecutionService<S, R, C>>,
}

impl<S, R, C> Scheduler<S, R, C>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: Arc<C>, execution: Arc<ExecutionService<S, R, C>>) -> Self {
        Self {
            store,
            clock,
            execution,
        }
    }

    /// Enable the schedule of a spec's cron trigger.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] for an unknown spec and
    /// [`ValidationError::InvalidTrigger`] when it has no cron trigger.
    #[tracing::instrument(skip(self))]
    pub async fn enable(&self, spec_id: SpecId) -> Result<Schedule, AutoEdgeError> {
        let now = self.clock.now();
        let schedule = match self.store.get_schedule(spec_id).await? {
            Some(mut schedule) => {
                schedule.enable(now).map_err(|reason| invalid(spec_id, reason))?;
                schedule
            }
            None => {
                let spec = self.current_spec(spec_id).await?;
                let Some(expression) = spec.trigger.cron_expression() else {
                    return Err(invalid(spec_id, "spec has no cron trigger".to_string()));
                };
                Schedule::enabled(spec_id, expression, now).map_err(|reason| invalid(spec_id, reason))?
            }
        };
        self.store.save_schedule(&schedule).await?;
        tracing::info!(next_run = ?schedule.next_run, "schedule enabled");
        Ok(schedule)
    }

    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] when the spec has no schedule.
    #[tracing::instrument(skip(self))]
    pub async fn disable(&self, spec_id: SpecId) -> Result<Schedule, AutoEdgeError> {
        let mut schedule = self.get(spec_id).await?;
        schedule.disable();
        self.store.save_schedule(&schedule).await?;
        tracing::info!("schedule disabled");
        Ok(schedule)
    }

    /// Next fire time, `None` when disabled.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] when the spec has no schedule.
    pub async fn next_run(&self, spec_id: SpecId) -> Result<Option<Timestamp>, AutoEdgeError> {
        Ok(self.get(spec_id).await?.next_run)
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list(&self) -> Result<Vec<Schedule>, AutoEdgeError> {
        let mut schedules = self.store.list_schedules().await?;
        schedules.sort_by_key(|schedule| (schedule.next_run.is_none(), schedule.next_run));
        Ok(schedules)
    }

    async fn get(&self, spec_id: SpecId) -> Result<Schedule, AutoEdgeError> {
        self.store.get_schedule(spec_id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Schedule",
                id: spec_id.to_string(),
            }
            .into()
        })
    }

    async fn current_spec(&self, spec_id: SpecId) -> Result<AutomationSpec, AutoEdgeError> {
        let spec = match self.store.get_rollout(spec_id).await? {
            Some(rollout) => {
                self.store
                    .get_spec_version(spec_id, rollout.active_version)
                    .await?
            }
            None => self.store.latest_spec_version(spec_id).await?,
        };
        spec.ok_or_else(|| {
            NotFoundError {
                entity: "Spec",
                id: spec_id.to_string(),
            }
            .into()
        })
    }

    /// Align the schedule with a newly deployed version's trigger.
    ///
    /// A new or changed cron expression (re-)enables the schedule; a
    /// non-cron trigger disables an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTrigger`] or a storage error.
    pub async fn sync(&self, spec: &AutomationSpec) -> Result<Option<Schedule>, AutoEdgeError> {
        let existing = self.store.get_schedule(spec.id).await?;
        let now = self.clock.now();
        let schedule = match (spec.trigger.cron_expression(), existing) {
            (Some(expression), Some(schedule)) if schedule.expression == expression => {
                return Ok(Some(schedule));
            }
            (Some(expression), _) => Schedule::enabled(spec.id, expression, now)
                .map_err(|reason| invalid(spec.id, reason))?,
            (None, Some(mut schedule)) if schedule.enabled => {
                schedule.disable();
                schedule
            }
            (None, existing) => return Ok(existing),
        };
        self.store.save_schedule(&schedule).await?;
        Ok(Some(schedule))
    }

    /// Submit every due run.
    ///
    /// While the kill switch is engaged or the spec's rollout is paused the
    /// run is skipped and the schedule moves on. A saturated queue leaves the
    /// schedule due, so the run is retried on the next tick.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self, now: Timestamp) -> Result<Tick, AutoEdgeError> {
        let mut tick = Tick::default();
        let kill_switch = self.store.get_kill_switch().await?;
        for mut schedule in self.store.list_schedules().await? {
            if !schedule.is_due(now) {
                continue;
            }
            let Some(fired_at) = schedule.next_run else {
                continue;
            };
            let paused = match self.store.get_rollout(schedule.spec_id).await? {
                Some(rollout) => rollout.is_paused(),
                None => true,
            };
            if kill_switch.engaged || paused {
                tracing::info!(
                    spec_id = %schedule.spec_id,
                    kill_switch = kill_switch.engaged,
                    "scheduled run skipped"
                );
                tick.skipped += 1;
            } else {
                let request = ExecuteRequest {
                    mode: ExecutionMode::Queued,
                    trigger_identity: Some(format!(
                        "cron:{}:{}",
                        schedule.spec_id,
                        fired_at.to_rfc3339()
                    )),
                    ..ExecuteRequest::default()
                };
                match self.execution.submit(schedule.spec_id, request).await {
                    Ok(submission) => {
                        tracing::debug!(task_id = %submission.task().id, "scheduled run submitted");
                        tick.submitted += 1;
                    }
                    Err(AutoEdgeError::QueueSaturated(err)) => {
                        tracing::warn!(spec_id = %schedule.spec_id, error = %err, "scheduled run deferred");
                        continue;
                    }
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        tracing::warn!(spec_id = %schedule.spec_id, error = %err, "scheduled run failed");
                        tick.skipped += 1;
                    }
                }
            }
            schedule
                .advance(fired_at, now)
                .map_err(|reason| invalid(schedule.spec_id, reason))?;
            self.store.save_schedule(&schedule).await?;
        }
        Ok(tick)
    }

    /// Tick every `interval` until `shutdown` flips to `true`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                () = self.clock.sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.tick(self.clock.now()).await {
                tracing::error!(error = %err, "scheduler tick failed");
            }
        }
        tracing::debug!("scheduler stopped");
    }
}

fn invalid(spec_id: SpecId, reason: String) -> AutoEdgeError {
    ValidationError::InvalidTrigger {
        reference: spec_id.to_string(),
        reason,
    }
    .into()
}
