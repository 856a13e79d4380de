//! Storage ports — repositories for specs, circuits, rollouts, schedules and
//! execution records.

use std::future::Future;

use autoedge_domain::circuit::CircuitState;
use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::id::{CorrelationId, SpecId};
use autoedge_domain::record::ExecutionRecord;
use autoedge_domain::rollout::{KillSwitch, RolloutState};
use autoedge_domain::schedule::Schedule;
use autoedge_domain::spec::AutomationSpec;

use super::TaskStore;

/// Append-only version history of automation specs.
pub trait SpecRepository: Send + Sync {
    /// Store a new version; `(id, version)` must not exist yet.
    fn insert_spec_version(
        &self,
        spec: &AutomationSpec,
    ) -> impl Future<Output = Result<(), AutoEdgeError>> + Send;

    fn get_spec_version(
        &self,
        id: SpecId,
        version: u32,
    ) -> impl Future<Output = Result<Option<AutomationSpec>, AutoEdgeError>> + Send;

    fn latest_spec_version(
        &self,
        id: SpecId,
    ) -> impl Future<Output = Result<Option<AutomationSpec>, AutoEdgeError>> + Send;

    /// Every version of a spec, oldest first.
    fn list_spec_versions(
        &self,
        id: SpecId,
    ) -> impl Future<Output = Result<Vec<AutomationSpec>, AutoEdgeError>> + Send;
}

/// Write-through persistence of circuit breakers.
pub trait CircuitStore: Send + Sync {
    fn save_circuit(
        &self,
        circuit: &CircuitState,
    ) -> impl Future<Output = Result<(), AutoEdgeError>> + Send;

    fn list_circuits(&self) -> impl Future<Output = Result<Vec<CircuitState>, AutoEdgeError>> + Send;
}

/// Per-spec rollout state and the global kill switch.
pub trait RolloutStore: Send + Sync {
    fn save_rollout(
        &self,
        rollout: &RolloutState,
    ) -> impl Future<Output = Result<(), AutoEdgeError>> + Send;

    fn get_rollout(
        &self,
        spec_id: SpecId,
    ) -> impl Future<Output = Result<Option<RolloutState>, AutoEdgeError>> + Send;

    fn list_rollouts(&self) -> impl Future<Output = Result<Vec<RolloutState>, AutoEdgeError>> + Send;

    fn get_kill_switch(&self) -> impl Future<Output = Result<KillSwitch, AutoEdgeError>> + Send;

    fn save_kill_switch(
        &self,
        kill_switch: &KillSwitch,
    ) -> impl Future<Output = Result<(), AutoEdgeError>> + Send;
}

/// Bounded store of [`ExecutionRecord`]s.
pub trait ExecutionRecordStore: Send + Sync {
    /// Insert or replace the record of its correlation id.
    fn save_record(
        &self,
        record: &ExecutionRecord,
    ) -> impl Future<Output = Result<(), AutoEdgeError>> + Send;

    fn get_record(
        &self,
        correlation_id: CorrelationId,
    ) -> impl Future<Output = Result<Option<ExecutionRecord>, AutoEdgeError>> + Send;

    /// Keep the `keep` most recently started records; returns how many were evicted.
    ///
    /// Records of tasks that are still waiting or running are never evicted
    /// and do not count towards `keep`: they list the steps already applied.
    fn evict_records(&self, keep: usize) -> impl Future<Output = Result<u64, AutoEdgeError>> + Send;
}

pub trait ScheduleStore: Send + Sync {
    fn save_schedule(
        &self,
        schedule: &Schedule,
    ) -> impl Future<Output = Result<(), AutoEdgeError>> + Send;

    fn get_schedule(
        &self,
        spec_id: SpecId,
    ) -> impl Future<Output = Result<Option<Schedule>, AutoEdgeError>> + Send;

    fn list_schedules(&self) -> impl Future<Output = Result<Vec<Schedule>, AutoEdgeError>> + Send;
}

/// Everything the engine persists, implemented by one storage adapter.
pub trait Storage:
    SpecRepository
    + TaskStore
    + CircuitStore
    + RolloutStore
    + ExecutionRecordStore
    + ScheduleStore
    + 'static
{
}

impl<T> Storage for T where
    T: SpecRepository
        + TaskStore
        + CircuitStore
        + RolloutStore
        + ExecutionRecordStore
        + ScheduleStore
        + 'static
{
}
