//! Helpers for appending to execution records and announcing task changes.

use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::event::{Event, EventType};
use autoedge_domain::record::{Decision, ExecutionRecord};
use autoedge_domain::task::Task;
use autoedge_domain::time::Timestamp;

use crate::ports::ExecutionRecordStore;

/// Load the record of the task's correlation id, or start one.
pub(crate) async fn load_for<S: ExecutionRecordStore>(
    store: &S,
    task: &Task,
    now: Timestamp,
) -> Result<ExecutionRecord, AutoEdgeError> {
    let mut record = store
        .get_record(task.correlation_id)
        .await?
        .unwrap_or_else(|| ExecutionRecord::new(task.correlation_id, task.spec_id, now));
    record.task_id.get_or_insert(task.id);
    record.spec_version.get_or_insert(task.spec_version);
    Ok(record)
}

/// Append decisions to the task's record and persist it.
pub(crate) async fn append<S: ExecutionRecordStore>(
    store: &S,
    task: &Task,
    decisions: impl IntoIterator<Item = Decision>,
    now: Timestamp,
) -> Result<(), AutoEdgeError> {
    let mut record = load_for(store, task, now).await?;
    for decision in decisions {
        record.push(decision, now);
    }
    store.save_record(&record).await
}

pub(crate) fn task_event(task: &Task) -> Event {
    Event::new(
        EventType::TaskStatusChanged,
        Some(task.id.to_string()),
        serde_json::json!({
            "spec_id": task.spec_id,
            "spec_version": task.spec_version,
            "status": task.status,
            "correlation_id": task.correlation_id,
        }),
    )
}
