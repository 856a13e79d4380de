//! In-memory port fakes shared by the unit tests of this crate.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use autoedge_domain::capability::{Inventory, ParamKind, ParamSchema, RemoteEntity, RemoteService};
use autoedge_domain::circuit::CircuitState;
use autoedge_domain::error::{AutoEdgeError, RemoteError, RemoteErrorKind};
use autoedge_domain::id::{CorrelationId, SpecId, TaskId};
use autoedge_domain::plan::ResolvedCall;
use autoedge_domain::record::ExecutionRecord;
use autoedge_domain::rollout::{KillSwitch, RolloutState};
use autoedge_domain::schedule::Schedule;
use autoedge_domain::spec::{Action, AutomationSpec, SpecDocument, Trigger};
use autoedge_domain::state::EntityState;
use autoedge_domain::target::TargetRef;
use autoedge_domain::task::{IdempotencyKey, Task, TaskFilter, TaskResult, TaskStatus};
use autoedge_domain::time::{self, Timestamp};

use crate::ports::{
    CircuitStore, Clock, ExecutionRecordStore, RemotePlatform, RolloutStore, ScheduleStore,
    ServiceOutcome, SpecRepository, TaskStore,
};

// ── Storage ────────────────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    specs: BTreeMap<(SpecId, u32), AutomationSpec>,
    tasks: HashMap<TaskId, Task>,
    circuits: BTreeMap<String, CircuitState>,
    rollouts: HashMap<SpecId, RolloutState>,
    kill_switch: KillSwitch,
    records: HashMap<CorrelationId, ExecutionRecord>,
    schedules: HashMap<SpecId, Schedule>,
}

#[derive(Default)]
pub struct InMemoryStorage {
    tables: Mutex<Tables>,
    fail_task_updates: AtomicBool,
}

impl InMemoryStorage {
    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent task update fail with a storage error.
    pub fn break_task_updates(&self) {
        self.fail_task_updates.store(true, Ordering::SeqCst);
    }

    fn check_task_updates(&self) -> Result<(), AutoEdgeError> {
        if self.fail_task_updates.load(Ordering::SeqCst) {
            Err(AutoEdgeError::Storage(Box::new(std::io::Error::other(
                "disk full",
            ))))
        } else {
            Ok(())
        }
    }
}

impl SpecRepository for InMemoryStorage {
    async fn insert_spec_version(&self, spec: &AutomationSpec) -> Result<(), AutoEdgeError> {
        self.tables()
            .specs
            .insert((spec.id, spec.version), spec.clone());
        Ok(())
    }

    async fn get_spec_version(
        &self,
        id: SpecId,
        version: u32,
    ) -> Result<Option<AutomationSpec>, AutoEdgeError> {
        Ok(self.tables().specs.get(&(id, version)).cloned())
    }

    async fn latest_spec_version(&self, id: SpecId) -> Result<Option<AutomationSpec>, AutoEdgeError> {
        Ok(self
            .tables()
            .specs
            .range((id, 0)..=(id, u32::MAX))
            .next_back()
            .map(|(_, spec)| spec.clone()))
    }

    async fn list_spec_versions(&self, id: SpecId) -> Result<Vec<AutomationSpec>, AutoEdgeError> {
        Ok(self
            .tables()
            .specs
            .range((id, 0)..=(id, u32::MAX))
            .map(|(_, spec)| spec.clone())
            .collect())
    }
}

impl TaskStore for InMemoryStorage {
    async fn insert_task(&self, task: &Task) -> Result<(), AutoEdgeError> {
        self.tables().tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, AutoEdgeError> {
        Ok(self.tables().tasks.get(&id).cloned())
    }

    async fn update_task(&self, task: &Task) -> Result<(), AutoEdgeError> {
        self.check_task_updates()?;
        self.tables().tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: TaskId,
        expected: &[TaskStatus],
        next: TaskStatus,
        result: Option<&TaskResult>,
        now: Timestamp,
    ) -> Result<bool, AutoEdgeError> {
        self.check_task_updates()?;
        let mut tables = self.tables();
        let Some(task) = tables.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if !expected.contains(&task.status) {
            return Ok(false);
        }
        task.status = next;
        task.updated_at = now;
        if let Some(result) = result {
            task.result = Some(result.clone());
        }
        Ok(true)
    }

    async fn find_task_by_key(
        &self,
        key: &IdempotencyKey,
        since: Timestamp,
    ) -> Result<Option<Task>, AutoEdgeError> {
        Ok(self
            .tables()
            .tasks
            .values()
            .filter(|task| &task.idempotency_key == key && task.created_at >= since)
            .max_by_key(|task| task.sequence)
            .cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, AutoEdgeError> {
        let mut tasks: Vec<_> = self
            .tables()
            .tasks
            .values()
            .filter(|task| filter.matches(task))
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.sequence);
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn list_unfinished_tasks(&self) -> Result<Vec<Task>, AutoEdgeError> {
        let mut tasks: Vec<_> = self
            .tables()
            .tasks
            .values()
            .filter(|task| !task.status.is_terminal())
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.sequence);
        Ok(tasks)
    }

    async fn cancel_waiting_tasks(
        &self,
        result: &TaskResult,
        now: Timestamp,
    ) -> Result<Vec<Task>, AutoEdgeError> {
        let mut tables = self.tables();
        let mut cancelled = Vec::new();
        for task in tables.tasks.values_mut() {
            if task.status.is_waiting() {
                task.status = TaskStatus::Cancelled;
                task.result = Some(result.clone());
                task.updated_at = now;
                cancelled.push(task.clone());
            }
        }
        cancelled.sort_by_key(|task| task.sequence);
        Ok(cancelled)
    }

    async fn purge_finished_tasks(&self, before: Timestamp) -> Result<u64, AutoEdgeError> {
        let mut tables = self.tables();
        let len = tables.tasks.len();
        tables
            .tasks
            .retain(|_, task| !(task.status.is_terminal() && task.updated_at < before));
        Ok((len - tables.tasks.len()) as u64)
    }

    async fn max_task_sequence(&self) -> Result<u64, AutoEdgeError> {
        Ok(self
            .tables()
            .tasks
            .values()
            .map(|task| task.sequence)
            .max()
            .unwrap_or(0))
    }
}

impl CircuitStore for InMemoryStorage {
    async fn save_circuit(&self, circuit: &CircuitState) -> Result<(), AutoEdgeError> {
        self.tables()
            .circuits
            .insert(circuit.target.clone(), circuit.clone());
        Ok(())
    }

    async fn list_circuits(&self) -> Result<Vec<CircuitState>, AutoEdgeError> {
        Ok(self.tables().circuits.values().cloned().collect())
    }
}

impl RolloutStore for InMemoryStorage {
    async fn save_rollout(&self, rollout: &RolloutState) -> Result<(), AutoEdgeError> {
        self.tables()
            .rollouts
            .insert(rollout.spec_id, rollout.clone());
        Ok(())
    }

    async fn get_rollout(&self, spec_id: SpecId) -> Result<Option<RolloutState>, AutoEdgeError> {
        Ok(self.tables().rollouts.get(&spec_id).cloned())
    }

    async fn list_rollouts(&self) -> Result<Vec<RolloutState>, AutoEdgeError> {
        Ok(self.tables().rollouts.values().cloned().collect())
    }

    async fn get_kill_switch(&self) -> Result<KillSwitch, AutoEdgeError> {
        Ok(self.tables().kill_switch)
    }

    async fn save_kill_switch(&self, kill_switch: &KillSwitch) -> Result<(), AutoEdgeError> {
        self.tables().kill_switch = *kill_switch;
        Ok(())
    }
}

impl ExecutionRecordStore for InMemoryStorage {
    async fn save_record(&self, record: &ExecutionRecord) -> Result<(), AutoEdgeError> {
        self.tables()
            .records
            .insert(record.correlation_id, record.clone());
        Ok(())
    }

    async fn get_record(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<ExecutionRecord>, AutoEdgeError> {
        Ok(self.tables().records.get(&correlation_id).cloned())
    }

    async fn evict_records(&self, keep: usize) -> Result<u64, AutoEdgeError> {
        let mut tables = self.tables();
        let live: HashSet<CorrelationId> = tables
            .tasks
            .values()
            .filter(|task| !task.status.is_terminal())
            .map(|task| task.correlation_id)
            .collect();
        let mut by_age: Vec<_> = tables
            .records
            .values()
            .filter(|record| !live.contains(&record.correlation_id))
            .map(|record| (record.started_at, record.correlation_id))
            .collect();
        by_age.sort();
        let excess = by_age.len().saturating_sub(keep);
        for (_, id) in by_age.into_iter().take(excess) {
            tables.records.remove(&id);
        }
        Ok(excess as u64)
    }
}

impl ScheduleStore for InMemoryStorage {
    async fn save_schedule(&self, schedule: &Schedule) -> Result<(), AutoEdgeError> {
        self.tables()
            .schedules
            .insert(schedule.spec_id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, spec_id: SpecId) -> Result<Option<Schedule>, AutoEdgeError> {
        Ok(self.tables().schedules.get(&spec_id).cloned())
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, AutoEdgeError> {
        Ok(self.tables().schedules.values().cloned().collect())
    }
}

// ── Remote platform ────────────────────────────────────────────────

/// Scripted remote platform recording every call.
#[derive(Default)]
pub struct FakeRemote {
    states: Mutex<HashMap<String, EntityState>>,
    failing: Mutex<HashMap<String, RemoteErrorKind>>,
    failing_once: Mutex<HashMap<String, usize>>,
    inventory_down: AtomicBool,
    calls: Mutex<Vec<ResolvedCall>>,
    call_delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    blocked: Mutex<HashSet<String>>,
}

impl FakeRemote {
    /// A platform with a kitchen light, a hall light, a fan switch, a
    /// thermostat and a front door lock.
    pub fn home() -> Self {
        let remote = Self::default();
        {
            let mut states = remote.states.lock().unwrap_or_else(PoisonError::into_inner);
            for (entity, state) in [
                ("light.kitchen_light", EntityState::Off),
                ("light.hall", EntityState::Off),
                ("switch.fan", EntityState::Off),
                ("climate.living_room", EntityState::from("heat")),
                ("lock.front_door", EntityState::from("locked")),
                ("binary_sensor.motion", EntityState::Off),
            ] {
                states.insert(entity.to_string(), state);
            }
        }
        remote
    }

    pub fn set_state(&self, entity_id: &str, state: EntityState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id.to_string(), state);
    }

    /// Every call on `entity_id` fails with `kind`.
    pub fn fail_always(&self, entity_id: &str, kind: RemoteErrorKind) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id.to_string(), kind);
    }

    /// The next `times` calls on `entity_id` time out.
    pub fn fail_times(&self, entity_id: &str, times: usize) {
        self.failing_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id.to_string(), times);
    }

    pub fn heal(&self, entity_id: &str) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(entity_id);
    }

    /// Calls on `entity_id` never return (until cancelled).
    pub fn block(&self, entity_id: &str) {
        self.blocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entity_id.to_string());
    }

    pub fn set_inventory_down(&self, down: bool) {
        self.inventory_down.store(down, Ordering::SeqCst);
    }

    pub fn set_call_delay(&self, delay: Duration) {
        *self.call_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn calls(&self) -> Vec<ResolvedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, entity_id: &str) -> Option<RemoteError> {
        if let Some(kind) = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
        {
            return Some(RemoteError::new(*kind, "scripted failure"));
        }
        let mut once = self.failing_once.lock().unwrap_or_else(PoisonError::into_inner);
        match once.get_mut(entity_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Some(RemoteError::new(RemoteErrorKind::Timeout, "scripted timeout"))
            }
            _ => None,
        }
    }
}

impl RemotePlatform for FakeRemote {
    async fn inventory(&self) -> Result<Inventory, RemoteError> {
        if self.inventory_down.load(Ordering::SeqCst) {
            return Err(RemoteError::new(RemoteErrorKind::Unavailable, "platform down"));
        }
        let states = self.states.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut entities: Vec<_> = states
            .into_iter()
            .map(|(entity_id, state)| RemoteEntity {
                entity_id,
                name: None,
                state,
                attributes: serde_json::Map::new(),
            })
            .collect();
        entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        Ok(Inventory {
            entities,
            services: home_services(),
        })
    }

    async fn entity_state(&self, entity_id: &str) -> Result<EntityState, RemoteError> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(entity_id)
            .cloned()
            .ok_or_else(|| RemoteError::new(RemoteErrorKind::NotFound, entity_id))
    }

    async fn invoke(&self, call: &ResolvedCall) -> Result<ServiceOutcome, RemoteError> {
        let entity_id = call.entity_id.clone().unwrap_or_default();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.clone());
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
        let delay = *self.call_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let blocked = self
            .blocked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&entity_id);
        if blocked {
            std::future::pending::<()>().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(err) = self.scripted_failure(&entity_id) {
            return Err(err);
        }
        let state = match call.service.as_str() {
            "turn_on" => Some(EntityState::On),
            "turn_off" => Some(EntityState::Off),
            _ => None,
        };
        if let Some(state) = &state {
            self.set_state(&entity_id, state.clone());
        }
        Ok(ServiceOutcome {
            resulting_state: state,
        })
    }
}

fn home_services() -> Vec<RemoteService> {
    let service = |domain: &str, name: &str, fields: Vec<(&str, ParamSchema)>| RemoteService {
        domain: domain.to_string(),
        service: name.to_string(),
        fields: fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    };
    vec![
        service(
            "light",
            "turn_on",
            vec![(
                "brightness",
                ParamSchema::optional(ParamKind::Integer {
                    min: Some(0),
                    max: Some(255),
                }),
            )],
        ),
        service("light", "turn_off", vec![]),
        service("light", "toggle", vec![]),
        service("switch", "turn_on", vec![]),
        service("switch", "turn_off", vec![]),
        service(
            "climate",
            "set_temperature",
            vec![(
                "temperature",
                ParamSchema::required(ParamKind::Number {
                    min: Some(7.0),
                    max: Some(35.0),
                }),
            )],
        ),
        service("lock", "lock", vec![]),
        service("lock", "unlock", vec![]),
    ]
}

// ── Clock ──────────────────────────────────────────────────────────

/// Clock that only moves when told to; `sleep` advances it instantly.
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(time::now()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = time::after(*now, duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

// ── Fixtures ───────────────────────────────────────────────────────

pub fn turn_on(entity_id: &str) -> Action {
    Action::TurnOn {
        target: TargetRef::entity(entity_id),
        brightness: None,
    }
}

pub fn document(name: &str, trigger: Trigger, actions: Vec<Action>) -> SpecDocument {
    SpecDocument {
        name: name.to_string(),
        trigger,
        conditions: Vec::new(),
        actions,
        policy_tags: std::collections::BTreeSet::new(),
    }
}

pub fn key(value: &str) -> IdempotencyKey {
    IdempotencyKey::explicit(value)
}
