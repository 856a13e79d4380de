//! Task store port — durable source of truth of the task queue.

use std::future::Future;

use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::id::TaskId;
use autoedge_domain::task::{IdempotencyKey, Task, TaskFilter, TaskResult, TaskStatus};
use autoedge_domain::time::Timestamp;

/// Durable storage for [`Task`]s.
///
/// Status changes that race between workers and control-plane calls go
/// through [`compare_and_set_status`](Self::compare_and_set_status) and
/// [`cancel_waiting_tasks`](Self::cancel_waiting_tasks), which must be
/// atomic in the implementation.
pub trait TaskStore: Send + Sync {
    /// Persist a new task.
    fn insert_task(&self, task: &Task) -> impl Future<Output = Result<(), AutoEdgeError>> + Send;

    fn get_task(
        &self,
        id: TaskId,
    ) -> impl Future<Output = Result<Option<Task>, AutoEdgeError>> + Send;

    /// Overwrite a task with its current in-memory value.
    fn update_task(&self, task: &Task) -> impl Future<Output = Result<(), AutoEdgeError>> + Send;

    /// Move the task to `next` only if its status is one of `expected`.
    ///
    /// When `result` is given it is stored along with the new status.
    /// Returns whether the update happened.
    fn compare_and_set_status(
        &self,
        id: TaskId,
        expected: &[TaskStatus],
        next: TaskStatus,
        result: Option<&TaskResult>,
        now: Timestamp,
    ) -> impl Future<Output = Result<bool, AutoEdgeError>> + Send;

    /// Newest task with `key` created at or after `since`.
    fn find_task_by_key(
        &self,
        key: &IdempotencyKey,
        since: Timestamp,
    ) -> impl Future<Output = Result<Option<Task>, AutoEdgeError>> + Send;

    /// Tasks matching the filter, in enqueue order.
    fn list_tasks(
        &self,
        filter: &TaskFilter,
    ) -> impl Future<Output = Result<Vec<Task>, AutoEdgeError>> + Send;

    /// Every `Pending`, `Scheduled` or `Running` task, in enqueue order.
    fn list_unfinished_tasks(&self) -> impl Future<Output = Result<Vec<Task>, AutoEdgeError>> + Send;

    /// Atomically cancel every `Pending` and `Scheduled` task, storing `result`.
    ///
    /// Returns the cancelled tasks in their new state.
    fn cancel_waiting_tasks(
        &self,
        result: &TaskResult,
        now: Timestamp,
    ) -> impl Future<Output = Result<Vec<Task>, AutoEdgeError>> + Send;

    /// Delete terminal tasks last updated before `before`; returns the count.
    fn purge_finished_tasks(
        &self,
        before: Timestamp,
    ) -> impl Future<Output = Result<u64, AutoEdgeError>> + Send;

    /// Highest enqueue sequence ever assigned, `0` when empty.
    fn max_task_sequence(&self) -> impl Future<Output = Result<u64, AutoEdgeError>> + Send;
}
