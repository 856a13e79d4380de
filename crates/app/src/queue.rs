//! Durable priority queue of tasks.
//!
//! Tasks live in the [`TaskStore`]; this module keeps an in-memory index of
//! the waiting ones. Ready tasks are ordered by priority (highest first) then
//! by enqueue sequence. Delayed tasks wait in a separate index until their
//! eta passes. The index is rebuilt from storage by [`TaskQueue::recover`].

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BinaryHeap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Notify, RwLock, watch};

use autoedge_domain::error::{AutoEdgeError, NotFoundError, QueueSaturatedError};
use autoedge_domain::id::TaskId;
use autoedge_domain::record::Decision;
use autoedge_domain::task::{
    EffectStatus, Failure, FailureKind, Outcome, Priority, TargetEffect, Task, TaskFilter,
    TaskResult, TaskStatus,
};
use autoedge_domain::time::{self, Timestamp};

use crate::event_bus::InProcessEventBus;
use crate::ports::{Clock, EventPublisher, Storage};
use crate::records;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadyEntry {
    priority: Priority,
    sequence: u64,
    task_id: TaskId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
struct QueueIndex {
    ready: BinaryHeap<ReadyEntry>,
    delayed: BTreeMap<(Timestamp, u64), (TaskId, Priority)>,
    /// Ids still waiting; heap and delayed entries not in here are stale.
    waiting: HashSet<TaskId>,
}

impl QueueIndex {
    fn push(&mut self, task: &Task, now: Timestamp) {
        self.waiting.insert(task.id);
        if task.is_due(now) {
            self.ready.push(ReadyEntry {
                priority: task.priority,
                sequence: task.sequence,
                task_id: task.id,
            });
        } else {
            self.delayed
                .insert((task.not_before, task.sequence), (task.id, task.priority));
        }
    }

    fn promote_due(&mut self, now: Timestamp) {
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let ((_, sequence), (task_id, priority)) = entry.remove_entry();
            self.ready.push(ReadyEntry {
                priority,
                sequence,
                task_id,
            });
        }
    }

    fn pop_ready(&mut self) -> Option<TaskId> {
        while let Some(entry) = self.ready.pop() {
            if self.waiting.remove(&entry.task_id) {
                return Some(entry.task_id);
            }
        }
        None
    }

    fn next_eta(&self) -> Option<Timestamp> {
        self.delayed
            .iter()
            .find(|(_, (id, _))| self.waiting.contains(id))
            .map(|((eta, _), _)| *eta)
    }
}

/// Report of a startup recovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Recovery {
    /// Tasks found `Running` and put back to `Pending`.
    pub requeued: usize,
    /// Waiting tasks indexed again.
    pub waiting: usize,
}

pub struct TaskQueue<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    events: Arc<InProcessEventBus>,
    index: Mutex<QueueIndex>,
    wake: Notify,
    /// Held shared while claiming, exclusively while pausing.
    gate: RwLock<()>,
    paused: AtomicBool,
    sequence: AtomicU64,
    high_water_mark: usize,
}

impl<S: Storage, C: Clock> TaskQueue<S, C> {
    pub fn new(
        store: Arc<S>,
        clock: Arc<C>,
        events: Arc<InProcessEventBus>,
        high_water_mark: usize,
    ) -> Self {
        Self {
            store,
            clock,
            events,
            index: Mutex::new(QueueIndex::default()),
            wake: Notify::new(),
            gate: RwLock::new(()),
            paused: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            high_water_mark,
        }
    }

    fn index(&self) -> std::sync::MutexGuard<'_, QueueIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of waiting tasks (pending and scheduled).
    #[must_use]
    pub fn depth(&self) -> usize {
        self.index().waiting.len()
    }

    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn offer(&self, task: &Task) {
        let now = self.clock.now();
        self.index().push(task, now);
    }

    fn forget(&self, task_id: TaskId) {
        self.index().waiting.remove(&task_id);
    }

    /// Persist a new task and make it available to workers.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::QueueSaturated`] at or above the high-water
    /// mark, or a storage error.
    #[tracing::instrument(skip(self, task), fields(task_id = %task.id, spec_id = %task.spec_id))]
    pub async fn enqueue(&self, mut task: Task) -> Result<Task, AutoEdgeError> {
        let depth = self.depth();
        if depth >= self.high_water_mark {
            tracing::warn!(depth, "queue saturated");
            return Err(QueueSaturatedError {
                depth,
                high_water_mark: self.high_water_mark,
            }
            .into());
        }
        task.sequence = self.next_sequence();
        self.store.insert_task(&task).await?;
        self.offer(&task);
        self.wake.notify_one();
        tracing::debug!(status = %task.status, priority = task.priority.0, "task enqueued");
        Ok(task)
    }

    /// Persist a task that the caller executes itself, bypassing the index.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn register(&self, mut task: Task) -> Result<Task, AutoEdgeError> {
        task.sequence = self.next_sequence();
        self.store.insert_task(&task).await?;
        Ok(task)
    }

    /// Hand a registered task over to the workers.
    pub(crate) fn adopt(&self, task: &Task) {
        self.offer(task);
        self.wake.notify_one();
    }

    /// Wait for the next dispatchable task and claim it.
    ///
    /// Returns `None` once `shutdown` flips to `true`.
    ///
    /// # Errors
    ///
    /// Propagates storage errors raised while claiming.
    pub async fn next(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<Task>, AutoEdgeError> {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if *shutdown.borrow() {
                return Ok(None);
            }
            let mut eta = None;
            if !self.is_paused() {
                let popped = {
                    let now = self.clock.now();
                    let mut index = self.index();
                    index.promote_due(now);
                    let popped = index.pop_ready();
                    eta = index.next_eta();
                    popped
                };
                if let Some(task_id) = popped {
                    if let Some(task) = self.claim(task_id).await? {
                        return Ok(Some(task));
                    }
                    continue;
                }
            }

            let delay = eta.map(|eta| time::elapsed(self.clock.now(), eta));
            tokio::select! {
                () = &mut notified => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
                () = self.clock.sleep(delay.unwrap_or_default()), if delay.is_some() => {}
            }
        }
    }

    /// Move a waiting task to `Running`; `None` when it was cancelled or
    /// claimed elsewhere in the meantime.
    async fn claim(&self, task_id: TaskId) -> Result<Option<Task>, AutoEdgeError> {
        let _gate = self.gate.read().await;
        if self.is_paused() {
            if let Some(task) = self.store.get_task(task_id).await?
                && task.status.is_waiting()
            {
                self.offer(&task);
            }
            return Ok(None);
        }
        self.claim_locked(task_id).await
    }

    /// Claim a task registered with [`TaskQueue::register`].
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn claim_registered(&self, task_id: TaskId) -> Result<Option<Task>, AutoEdgeError> {
        let _gate = self.gate.read().await;
        if self.is_paused() {
            return Ok(None);
        }
        self.claim_locked(task_id).await
    }

    async fn claim_locked(&self, task_id: TaskId) -> Result<Option<Task>, AutoEdgeError> {
        let now = self.clock.now();
        let claimed = self
            .store
            .compare_and_set_status(
                task_id,
                &[TaskStatus::Pending, TaskStatus::Scheduled],
                TaskStatus::Running,
                None,
                now,
            )
            .await?;
        if !claimed {
            return Ok(None);
        }
        self.forget(task_id);
        let task = self.store.get_task(task_id).await?;
        if let Some(task) = &task {
            self.announce(task).await;
        }
        Ok(task)
    }

    /// Cancel a task that has not started.
    ///
    /// Returns `false` when the task is no longer waiting.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, task_id: TaskId, reason: &str) -> Result<bool, AutoEdgeError> {
        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(false);
        };
        let now = self.clock.now();
        let result = cancelled_result(&task, reason, now);
        let cancelled = self
            .store
            .compare_and_set_status(
                task_id,
                &[TaskStatus::Pending, TaskStatus::Scheduled],
                TaskStatus::Cancelled,
                Some(&result),
                now,
            )
            .await?;
        if cancelled {
            self.forget(task_id);
            self.close_record(&task, reason, now).await?;
            if let Some(task) = self.store.get_task(task_id).await? {
                self.announce(&task).await;
            }
            tracing::info!(reason, "task cancelled");
        }
        Ok(cancelled)
    }

    /// Fetch a task.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] for an unknown id.
    pub async fn status(&self, task_id: TaskId) -> Result<Task, AutoEdgeError> {
        self.store.get_task(task_id).await?.ok_or_else(|| {
            NotFoundError {
                entity: "Task",
                id: task_id.to_string(),
            }
            .into()
        })
    }

    /// List tasks in enqueue order.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, AutoEdgeError> {
        self.store.list_tasks(filter).await
    }

    /// Stop dispatching and cancel every waiting task.
    ///
    /// Waits for in-progress claims, so no task is claimed after this returns.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    #[tracing::instrument(skip(self))]
    pub async fn pause(&self, reason: &str) -> Result<Vec<TaskId>, AutoEdgeError> {
        let _gate = self.gate.write().await;
        self.paused.store(true, Ordering::SeqCst);
        let now = self.clock.now();
        let template = TaskResult {
            outcome: Outcome::Cancelled,
            effects: Vec::new(),
            failure: Some(Failure {
                kind: FailureKind::Cancelled,
                message: reason.to_string(),
                target: None,
            }),
            finished_at: now,
        };
        let cancelled = self.store.cancel_waiting_tasks(&template, now).await?;
        *self.index() = QueueIndex::default();
        for task in &cancelled {
            self.close_record(task, reason, now).await?;
            self.announce(task).await;
        }
        tracing::warn!(cancelled = cancelled.len(), "dispatch paused");
        Ok(cancelled.into_iter().map(|task| task.id).collect())
    }

    /// Resume dispatching.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
        tracing::info!("dispatch resumed");
    }

    /// Restore the paused flag without cancelling anything (startup).
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    /// Rebuild the index from storage after a restart.
    ///
    /// Tasks left `Running` by a crash go back to `Pending`; their execution
    /// record already lists the calls that were applied.
    ///
    /// # Errors
    ///
    /// Propagates storage errors.
    #[tracing::instrument(skip(self))]
    pub async fn recover(&self) -> Result<Recovery, AutoEdgeError> {
        let sequence = self.store.max_task_sequence().await?;
        self.sequence.fetch_max(sequence, Ordering::SeqCst);
        let now = self.clock.now();
        let mut report = Recovery::default();
        for task in self.store.list_unfinished_tasks().await? {
            let task = if task.status == TaskStatus::Running {
                let requeued = self
                    .store
                    .compare_and_set_status(
                        task.id,
                        &[TaskStatus::Running],
                        TaskStatus::Pending,
                        None,
                        now,
                    )
                    .await?;
                if !requeued {
                    continue;
                }
                records::append(&*self.store, &task, [Decision::Recovered], now).await?;
                report.requeued += 1;
                match self.store.get_task(task.id).await? {
                    Some(task) => task,
                    None => continue,
                }
            } else {
                task
            };
            if task.status.is_waiting() {
                self.offer(&task);
                report.waiting += 1;
            }
        }
        if report.waiting > 0 {
            self.wake.notify_waiters();
        }
        tracing::info!(
            requeued = report.requeued,
            waiting = report.waiting,
            "queue recovered"
        );
        Ok(report)
    }

    async fn close_record(
        &self,
        task: &Task,
        reason: &str,
        now: Timestamp,
    ) -> Result<(), AutoEdgeError> {
        records::append(
            &*self.store,
            task,
            [
                Decision::Cancelled {
                    reason: reason.to_string(),
                },
                Decision::Finished {
                    status: TaskStatus::Cancelled,
                },
            ],
            now,
        )
        .await
    }

    async fn announce(&self, task: &Task) {
        if let Err(err) = self.events.publish(records::task_event(task)).await {
            tracing::debug!(error = %err, "task event not delivered");
        }
    }
}

/// Result stored on a task cancelled before it started.
pub(crate) fn cancelled_result(task: &Task, reason: &str, now: Timestamp) -> TaskResult {
    TaskResult {
        outcome: Outcome::Cancelled,
        effects: task
            .plan
            .invocations()
            .map(|(_, call)| TargetEffect {
                target: call.target.clone(),
                service: call.service.clone(),
                status: EffectStatus::NotAttempted,
                resulting_state: None,
            })
            .collect(),
        failure: Some(Failure {
            kind: FailureKind::Cancelled,
            message: reason.to_string(),
            target: None,
        }),
        finished_at: now,
    }
}
