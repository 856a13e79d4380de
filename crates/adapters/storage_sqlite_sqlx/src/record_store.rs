//! `SQLite` implementation of [`ExecutionRecordStore`].

use autoedge_app::ports::ExecutionRecordStore;
use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::id::CorrelationId;
use autoedge_domain::record::ExecutionRecord;

use crate::codec::{from_json, timestamp, to_json};
use crate::error::StorageError;
use crate::store::SqliteStorage;

impl ExecutionRecordStore for SqliteStorage {
    async fn save_record(&self, record: &ExecutionRecord) -> Result<(), AutoEdgeError> {
        sqlx::query(
            "INSERT INTO execution_records (correlation_id, spec_id, task_id, started_at, data) VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(correlation_id) DO UPDATE SET task_id = excluded.task_id, data = excluded.data",
        )
        .bind(record.correlation_id.to_string())
        .bind(record.spec_id.to_string())
        .bind(record.task_id.map(|id| id.to_string()))
        .bind(timestamp(record.started_at))
        .bind(to_json(record)?)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_record(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Option<ExecutionRecord>, AutoEdgeError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM execution_records WHERE correlation_id = ?")
                .bind(correlation_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(row
            .map(|(data,)| from_json(&data))
            .transpose()
            .map_err(StorageError::from)?)
    }

    async fn evict_records(&self, keep: usize) -> Result<u64, AutoEdgeError> {
        let done = sqlx::query(
            "DELETE FROM execution_records WHERE correlation_id IN (\
                SELECT correlation_id FROM execution_records \
                WHERE correlation_id NOT IN (\
                    SELECT correlation_id FROM tasks WHERE status IN ('pending', 'scheduled', 'running')) \
                ORDER BY started_at DESC, correlation_id DESC LIMIT -1 OFFSET ?)",
        )
        .bind(i64::try_from(keep).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        let evicted = done.rows_affected();
        if evicted > 0 {
            tracing::debug!(evicted, keep, "execution records evicted");
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use autoedge_domain::id::{SpecId, TaskId};
    use autoedge_domain::record::Decision;
    use autoedge_domain::task::TaskStatus;
    use autoedge_app::ports::TaskStore;
    use autoedge_domain::time;

    use super::*;
    use crate::store::{memory, planned_task};

    #[tokio::test]
    async fn should_replace_record_as_it_grows() {
        let store = memory().await;
        let now = time::now();
        let mut record = ExecutionRecord::new(CorrelationId::new(), SpecId::new(), now);
        record.push(
            Decision::Validated {
                passed: true,
                errors: Vec::new(),
            },
            now,
        );
        store.save_record(&record).await.unwrap();
        record.task_id = Some(TaskId::new());
        record.push(
            Decision::Finished {
                status: TaskStatus::Succeeded,
            },
            now,
        );
        store.save_record(&record).await.unwrap();

        let stored = store.get_record(record.correlation_id).await.unwrap();

        assert_eq!(stored, Some(record));
    }

    #[tokio::test]
    async fn should_evict_oldest_records_first() {
        let store = memory().await;
        let start = time::now();
        let mut ids = Vec::new();
        for offset in 0..4 {
            let record = ExecutionRecord::new(
                CorrelationId::new(),
                SpecId::new(),
                time::after(start, Duration::from_secs(offset)),
            );
            store.save_record(&record).await.unwrap();
            ids.push(record.correlation_id);
        }

        let evicted = store.evict_records(2).await.unwrap();

        assert_eq!(evicted, 2);
        assert!(store.get_record(ids[0]).await.unwrap().is_none());
        assert!(store.get_record(ids[1]).await.unwrap().is_none());
        assert!(store.get_record(ids[3]).await.unwrap().is_some());
        assert_eq!(store.evict_records(2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn should_keep_records_of_unfinished_tasks() {
        let store = memory().await;
        let now = time::now();
        let mut running = planned_task(SpecId::new(), "running", 1, now);
        running.status = TaskStatus::Running;
        let mut finished = planned_task(SpecId::new(), "finished", 2, now);
        finished.status = TaskStatus::Succeeded;
        for task in [&running, &finished] {
            store.insert_task(task).await.unwrap();
            let mut record = ExecutionRecord::new(task.correlation_id, task.spec_id, now);
            record.task_id = Some(task.id);
            store.save_record(&record).await.unwrap();
        }

        let evicted = store.evict_records(0).await.unwrap();

        assert_eq!(evicted, 1);
        assert!(store.get_record(running.correlation_id).await.unwrap().is_some());
        assert!(store.get_record(finished.correlation_id).await.unwrap().is_none());
    }
}
