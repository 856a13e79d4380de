//! Rollout and kill-switch control plane.

use std::sync::Arc;

use autoedge_domain::error::{AutoEdgeError, NotFoundError, RolloutError, SpecRejection};
use autoedge_domain::event::{Event, EventType};
use autoedge_domain::id::{SpecId, TaskId};
use autoedge_domain::planner;
use autoedge_domain::policy::PolicyConfig;
use autoedge_domain::rollout::{KillSwitch, RolloutState};
use autoedge_domain::spec::AutomationSpec;

use crate::capabilities::CapabilityGraphBuilder;
use crate::event_bus::InProcessEventBus;
use crate::ports::{Clock, EventPublisher, RemotePlatform, Storage};
use crate::queue::TaskQueue;
use crate::scheduler::Scheduler;

/// Controls which spec version handles triggers, and the global stop.
pub struct RolloutManager<S, R, C> {
    store: Arc<S>,
    graph: Arc<CapabilityGraphBuilder<R, C>>,
    queue: Arc<TaskQueue<S, C>>,
    scheduler: Arc<Scheduler<S, R, C>>,
    events: Arc<InProcessEventBus>,
    clock: Arc<C>,
    policy: PolicyConfig,
}

impl<S, R, C> RolloutManager<S, R, C>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    pub fn new(
        store: Arc<S>,
        graph: Arc<CapabilityGraphBuilder<R, C>>,
        queue: Arc<TaskQueue<S, C>>,
        scheduler: Arc<Scheduler<S, R, C>>,
        events: Arc<InProcessEventBus>,
        clock: Arc<C>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            store,
            graph,
            queue,
            scheduler,
            events,
            clock,
            policy,
        }
    }

    /// Restore the kill switch after a restart.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn load(&self) -> Result<KillSwitch, AutoEdgeError> {
        let kill_switch = self.store.get_kill_switch().await?;
        self.queue.set_paused(kill_switch.engaged);
        if kill_switch.engaged {
            tracing::warn!("kill switch engaged at startup");
        }
        Ok(kill_switch)
    }

    /// Make `version` the active version of a spec, fully rolled out.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] for an unknown version,
    /// [`AutoEdgeError::Rejected`] when it does not plan against the current
    /// capability graph, or a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn deploy(&self, spec_id: SpecId, version: u32) -> Result<RolloutState, AutoEdgeError> {
        let spec = self.checked_version(spec_id, version).await?;
        let current = self.store.get_rollout(spec_id).await?;
        let rollout = RolloutState::deployed(spec_id, version, current.as_ref(), self.clock.now());
        self.store.save_rollout(&rollout).await?;
        self.scheduler.sync(&spec).await?;
        tracing::info!(version, "spec deployed");
        self.announce(EventType::SpecDeployed, &rollout).await;
        Ok(rollout)
    }

    /// Route `percentage` of triggers to the latest registered version.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError`] variants when the spec is not deployed, paused
    /// or has no newer version, a validation error for the percentage, or
    /// [`AutoEdgeError::Rejected`] when the candidate does not plan.
    #[tracing::instrument(skip(self))]
    pub async fn set_canary(
        &self,
        spec_id: SpecId,
        percentage: u8,
    ) -> Result<RolloutState, AutoEdgeError> {
        let mut rollout = self.get(spec_id).await?;
        let latest = self
            .store
            .latest_spec_version(spec_id)
            .await?
            .ok_or_else(|| not_deployed(spec_id))?;
        if latest.version > rollout.active_version {
            self.checked_version(spec_id, latest.version).await?;
        }
        rollout.set_canary(latest.version, percentage, self.clock.now())?;
        self.store.save_rollout(&rollout).await?;
        tracing::info!(candidate = rollout.active_version, percentage, "canary started");
        self.announce(EventType::RolloutChanged, &rollout).await;
        Ok(rollout)
    }

    /// # Errors
    ///
    /// Returns [`RolloutError::NotInCanary`] or [`RolloutError::NotDeployed`].
    #[tracing::instrument(skip(self))]
    pub async fn promote(&self, spec_id: SpecId) -> Result<RolloutState, AutoEdgeError> {
        let mut rollout = self.get(spec_id).await?;
        rollout.promote(self.clock.now())?;
        self.save(&rollout).await?;
        if let Some(spec) = self
            .store
            .get_spec_version(spec_id, rollout.active_version)
            .await?
        {
            self.scheduler.sync(&spec).await?;
        }
        tracing::info!(version = rollout.active_version, "canary promoted");
        Ok(rollout)
    }

    /// Reactivate the previous version; queued tasks of the retired version
    /// are cancelled when dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError::NothingToRollBack`] or [`RolloutError::NotDeployed`].
    #[tracing::instrument(skip(self))]
    pub async fn rollback(&self, spec_id: SpecId) -> Result<RolloutState, AutoEdgeError> {
        let mut rollout = self.get(spec_id).await?;
        let retired = rollout.rollback(self.clock.now())?;
        self.save(&rollout).await?;
        if let Some(spec) = self
            .store
            .get_spec_version(spec_id, rollout.active_version)
            .await?
        {
            self.scheduler.sync(&spec).await?;
        }
        tracing::warn!(retired, active = rollout.active_version, "rolled back");
        Ok(rollout)
    }

    /// # Errors
    ///
    /// Returns [`RolloutError::NotDeployed`].
    #[tracing::instrument(skip(self))]
    pub async fn pause_spec(&self, spec_id: SpecId) -> Result<RolloutState, AutoEdgeError> {
        let mut rollout = self.get(spec_id).await?;
        rollout.pause(self.clock.now());
        self.save(&rollout).await?;
        tracing::info!("spec rollout paused");
        Ok(rollout)
    }

    /// # Errors
    ///
    /// Returns [`RolloutError::NotDeployed`].
    #[tracing::instrument(skip(self))]
    pub async fn resume_spec(&self, spec_id: SpecId) -> Result<RolloutState, AutoEdgeError> {
        let mut rollout = self.get(spec_id).await?;
        rollout.resume(self.clock.now());
        self.save(&rollout).await?;
        tracing::info!("spec rollout resumed");
        Ok(rollout)
    }

    /// Version that handles a trigger.
    ///
    /// # Errors
    ///
    /// Returns [`RolloutError::NotDeployed`] or [`RolloutError::Paused`].
    pub async fn route(&self, spec_id: SpecId, trigger_identity: &str) -> Result<u32, AutoEdgeError> {
        let rollout = self.get(spec_id).await?;
        rollout.route(trigger_identity).ok_or_else(|| {
            RolloutError::Paused {
                spec_id: spec_id.to_string(),
            }
            .into()
        })
    }

    /// # Errors
    ///
    /// Returns [`RolloutError::NotDeployed`].
    pub async fn get(&self, spec_id: SpecId) -> Result<RolloutState, AutoEdgeError> {
        self.store
            .get_rollout(spec_id)
            .await?
            .ok_or_else(|| not_deployed(spec_id))
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn kill_switch(&self) -> Result<KillSwitch, AutoEdgeError> {
        self.store.get_kill_switch().await
    }

    /// Engage the kill switch and cancel every waiting task.
    ///
    /// Returns the cancelled task ids.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn pause(&self) -> Result<Vec<TaskId>, AutoEdgeError> {
        self.set_kill_switch(true).await?;
        self.queue.pause("kill switch engaged").await
    }

    /// Clear the kill switch. Cancelled tasks stay cancelled.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn resume(&self) -> Result<KillSwitch, AutoEdgeError> {
        let kill_switch = self.set_kill_switch(false).await?;
        self.queue.resume();
        Ok(kill_switch)
    }

    async fn set_kill_switch(&self, engaged: bool) -> Result<KillSwitch, AutoEdgeError> {
        let kill_switch = KillSwitch {
            engaged,
            changed_at: Some(self.clock.now()),
        };
        self.store.save_kill_switch(&kill_switch).await?;
        let event = Event::new(
            EventType::KillSwitchChanged,
            None,
            serde_json::json!({ "engaged": engaged }),
        );
        if let Err(err) = self.events.publish(event).await {
            tracing::debug!(error = %err, "kill switch event not delivered");
        }
        Ok(kill_switch)
    }

    async fn checked_version(
        &self,
        spec_id: SpecId,
        version: u32,
    ) -> Result<AutomationSpec, AutoEdgeError> {
        let spec = self
            .store
            .get_spec_version(spec_id, version)
            .await?
            .ok_or_else(|| NotFoundError {
                entity: "Spec",
                id: format!("{spec_id} v{version}"),
            })?;
        planner::plan(&spec, &self.graph.snapshot(), &self.policy).map_err(|errors| {
            SpecRejection {
                errors,
                correlation_id: None,
            }
        })?;
        Ok(spec)
    }

    async fn save(&self, rollout: &RolloutState) -> Result<(), AutoEdgeError> {
        self.store.save_rollout(rollout).await?;
        self.announce(EventType::RolloutChanged, rollout).await;
        Ok(())
    }

    async fn announce(&self, event_type: EventType, rollout: &RolloutState) {
        let data = serde_json::to_value(rollout).unwrap_or_default();
        let event = Event::new(event_type, Some(rollout.spec_id.to_string()), data);
        if let Err(err) = self.events.publish(event).await {
            tracing::debug!(error = %err, "rollout event not delivered");
        }
    }
}

fn not_deployed(spec_id: SpecId) -> AutoEdgeError {
    RolloutError::NotDeployed {
        spec_id: spec_id.to_string(),
    }
    .into()
}
