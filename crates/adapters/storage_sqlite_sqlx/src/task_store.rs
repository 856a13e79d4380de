//! `SQLite` implementation of [`TaskStore`].
//!
//! Status races are settled by the database: compare-and-set is a single
//! conditional `UPDATE`, and cancelling the waiting set is one
//! `UPDATE ... RETURNING`.

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, QueryBuilder, Row, Sqlite};

use autoedge_app::ports::TaskStore;
use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::id::TaskId;
use autoedge_domain::task::{IdempotencyKey, Priority, Task, TaskFilter, TaskResult, TaskStatus};
use autoedge_domain::time::Timestamp;

use crate::codec::{
    from_json, from_sql_int, parse, parse_timestamp, timestamp, to_json, to_sql_int,
};
use crate::error::StorageError;
use crate::store::SqliteStorage;

struct Wrapper(Task);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<Task> {
        value.map(|w| w.0)
    }

    fn all(rows: Vec<Self>) -> Vec<Task> {
        rows.into_iter().map(|w| w.0).collect()
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let spec_id: String = row.try_get("spec_id")?;
        let correlation_id: String = row.try_get("correlation_id")?;
        let status: String = row.try_get("status")?;
        let key: String = row.try_get("idempotency_key")?;
        let plan_json: String = row.try_get("plan")?;
        let result_json: Option<String> = row.try_get("result")?;
        let not_before: String = row.try_get("not_before")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Self(Task {
            id: parse(&id)?,
            spec_id: parse(&spec_id)?,
            spec_version: from_sql_int(row.try_get::<i64, _>("spec_version")?)?,
            idempotency_key: IdempotencyKey::explicit(key),
            trigger_identity: row.try_get("trigger_identity")?,
            correlation_id: parse(&correlation_id)?,
            status: status
                .parse::<TaskStatus>()
                .map_err(|reason| sqlx::Error::Decode(reason.into()))?,
            priority: Priority(from_sql_int(row.try_get::<i64, _>("priority")?)?),
            not_before: parse_timestamp(&not_before)?,
            sequence: from_sql_int(row.try_get::<i64, _>("sequence")?)?,
            attempt_count: from_sql_int(row.try_get::<i64, _>("attempt_count")?)?,
            dry_run: row.try_get("dry_run")?,
            plan: from_json(&plan_json)?,
            result: result_json.as_deref().map(from_json).transpose()?,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }
}

fn result_json(result: Option<&TaskResult>) -> Result<Option<String>, StorageError> {
    result.map(to_json).transpose()
}

impl TaskStore for SqliteStorage {
    async fn insert_task(&self, task: &Task) -> Result<(), AutoEdgeError> {
        sqlx::query(
            "INSERT INTO tasks (id, spec_id, spec_version, idempotency_key, trigger_identity, correlation_id, status, priority, not_before, sequence, attempt_count, dry_run, plan, result, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(task.id.to_string())
        .bind(task.spec_id.to_string())
        .bind(i64::from(task.spec_version))
        .bind(task.idempotency_key.as_str())
        .bind(&task.trigger_identity)
        .bind(task.correlation_id.to_string())
        .bind(task.status.as_str())
        .bind(i64::from(task.priority.0))
        .bind(timestamp(task.not_before))
        .bind(to_sql_int(task.sequence))
        .bind(i64::from(task.attempt_count))
        .bind(task.dry_run)
        .bind(to_json(&task.plan)?)
        .bind(result_json(task.result.as_ref())?)
        .bind(timestamp(task.created_at))
        .bind(timestamp(task.updated_at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, AutoEdgeError> {
        let row: Option<Wrapper> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::maybe(row))
    }

    async fn update_task(&self, task: &Task) -> Result<(), AutoEdgeError> {
        sqlx::query(
            "UPDATE tasks SET status = ?, priority = ?, not_before = ?, sequence = ?, attempt_count = ?, result = ?, updated_at = ? WHERE id = ?",
        )
        .bind(task.status.as_str())
        .bind(i64::from(task.priority.0))
        .bind(timestamp(task.not_before))
        .bind(to_sql_int(task.sequence))
        .bind(i64::from(task.attempt_count))
        .bind(result_json(task.result.as_ref())?)
        .bind(timestamp(task.updated_at))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
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
        if expected.is_empty() {
            return Ok(false);
        }
        let mut query = QueryBuilder::<Sqlite>::new("UPDATE tasks SET status = ");
        query
            .push_bind(next.as_str())
            .push(", updated_at = ")
            .push_bind(timestamp(now))
            .push(", result = COALESCE(")
            .push_bind(result_json(result)?)
            .push(", result) WHERE id = ")
            .push_bind(id.to_string())
            .push(" AND status IN (");
        let mut statuses = query.separated(", ");
        for status in expected {
            statuses.push_bind(status.as_str());
        }
        statuses.push_unseparated(")");

        let done = query
            .build()
            .execute(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(done.rows_affected() == 1)
    }

    async fn find_task_by_key(
        &self,
        key: &IdempotencyKey,
        since: Timestamp,
    ) -> Result<Option<Task>, AutoEdgeError> {
        let row: Option<Wrapper> = sqlx::query_as(
            "SELECT * FROM tasks WHERE idempotency_key = ? AND created_at >= ? ORDER BY sequence DESC LIMIT 1",
        )
        .bind(key.as_str())
        .bind(timestamp(since))
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(Wrapper::maybe(row))
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, AutoEdgeError> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM tasks WHERE 1 = 1");
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(spec_id) = filter.spec_id {
            query.push(" AND spec_id = ").push_bind(spec_id.to_string());
        }
        query.push(" ORDER BY sequence");
        if let Some(limit) = filter.limit {
            query
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        let rows: Vec<Wrapper> = query
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(Wrapper::all(rows))
    }

    async fn list_unfinished_tasks(&self) -> Result<Vec<Task>, AutoEdgeError> {
        let rows: Vec<Wrapper> = sqlx::query_as(
            "SELECT * FROM tasks WHERE status IN ('pending', 'scheduled', 'running') ORDER BY sequence",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(Wrapper::all(rows))
    }

    async fn cancel_waiting_tasks(
        &self,
        result: &TaskResult,
        now: Timestamp,
    ) -> Result<Vec<Task>, AutoEdgeError> {
        let rows: Vec<Wrapper> = sqlx::query_as(
            "UPDATE tasks SET status = 'cancelled', result = ?, updated_at = ? WHERE status IN ('pending', 'scheduled') RETURNING *",
        )
        .bind(to_json(result)?)
        .bind(timestamp(now))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::from)?;
        let mut cancelled = Wrapper::all(rows);
        cancelled.sort_by_key(|task| task.sequence);
        Ok(cancelled)
    }

    async fn purge_finished_tasks(&self, before: Timestamp) -> Result<u64, AutoEdgeError> {
        let done = sqlx::query(
            "DELETE FROM tasks WHERE status IN ('succeeded', 'failed', 'cancelled') AND updated_at < ?",
        )
        .bind(timestamp(before))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(done.rows_affected())
    }

    async fn max_task_sequence(&self) -> Result<u64, AutoEdgeError> {
        let max: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(sequence), 0) FROM tasks")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(u64::try_from(max).unwrap_or(0))
    }
}
