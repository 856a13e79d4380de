//! Circuit breakers, rollouts, the kill switch and cron schedules.
//!
//! These rows are small and always read whole, so each is one JSON
//! document keyed by its owner.

use sqlx::Row;

use autoedge_app::ports::{CircuitStore, RolloutStore, ScheduleStore};
use autoedge_domain::circuit::CircuitState;
use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::id::SpecId;
use autoedge_domain::rollout::{KillSwitch, RolloutState};
use autoedge_domain::schedule::Schedule;

use crate::codec::{from_json, parse_optional_timestamp, timestamp, to_json};
use crate::error::StorageError;
use crate::store::SqliteStorage;

fn decode_all<T: serde::de::DeserializeOwned>(rows: &[(String,)]) -> Result<Vec<T>, AutoEdgeError> {
    rows.iter()
        .map(|(data,)| from_json(data).map_err(|err| StorageError::from(err).into()))
        .collect()
}

fn decode_one<T: serde::de::DeserializeOwned>(
    row: Option<(String,)>,
) -> Result<Option<T>, AutoEdgeError> {
    row.map(|(data,)| from_json(&data).map_err(StorageError::from))
        .transpose()
        .map_err(AutoEdgeError::from)
}

impl CircuitStore for SqliteStorage {
    async fn save_circuit(&self, circuit: &CircuitState) -> Result<(), AutoEdgeError> {
        sqlx::query(
            "INSERT INTO circuits (target, data) VALUES (?, ?) ON CONFLICT(target) DO UPDATE SET data = excluded.data",
        )
        .bind(&circuit.target)
        .bind(to_json(circuit)?)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn list_circuits(&self) -> Result<Vec<CircuitState>, AutoEdgeError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT data FROM circuits ORDER BY target")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        decode_all(&rows)
    }
}

impl RolloutStore for SqliteStorage {
    async fn save_rollout(&self, rollout: &RolloutState) -> Result<(), AutoEdgeError> {
        sqlx::query(
            "INSERT INTO rollouts (spec_id, data) VALUES (?, ?) ON CONFLICT(spec_id) DO UPDATE SET data = excluded.data",
        )
        .bind(rollout.spec_id.to_string())
        .bind(to_json(rollout)?)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_rollout(&self, spec_id: SpecId) -> Result<Option<RolloutState>, AutoEdgeError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM rollouts WHERE spec_id = ?")
            .bind(spec_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        decode_one(row)
    }

    async fn list_rollouts(&self) -> Result<Vec<RolloutState>, AutoEdgeError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT data FROM rollouts ORDER BY spec_id")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        decode_all(&rows)
    }

    async fn get_kill_switch(&self) -> Result<KillSwitch, AutoEdgeError> {
        let row = sqlx::query("SELECT engaged, changed_at FROM kill_switch WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(StorageError::from)?;
        let Some(row) = row else {
            return Ok(KillSwitch::default());
        };
        let engaged: bool = row.try_get("engaged").map_err(StorageError::from)?;
        let changed_at: Option<String> = row.try_get("changed_at").map_err(StorageError::from)?;
        Ok(KillSwitch {
            engaged,
            changed_at: parse_optional_timestamp(changed_at).map_err(StorageError::from)?,
        })
    }

    async fn save_kill_switch(&self, kill_switch: &KillSwitch) -> Result<(), AutoEdgeError> {
        sqlx::query(
            "INSERT INTO kill_switch (id, engaged, changed_at) VALUES (1, ?, ?) ON CONFLICT(id) DO UPDATE SET engaged = excluded.engaged, changed_at = excluded.changed_at",
        )
        .bind(kill_switch.engaged)
        .bind(kill_switch.changed_at.map(timestamp))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }
}

impl ScheduleStore for SqliteStorage {
    async fn save_schedule(&self, schedule: &Schedule) -> Result<(), AutoEdgeError> {
        sqlx::query(
            "INSERT INTO schedules (spec_id, data) VALUES (?, ?) ON CONFLICT(spec_id) DO UPDATE SET data = excluded.data",
        )
        .bind(schedule.spec_id.to_string())
        .bind(to_json(schedule)?)
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_schedule(&self, spec_id: SpecId) -> Result<Option<Schedule>, AutoEdgeError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM schedules WHERE spec_id = ?")
                .bind(spec_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?;
        decode_one(row)
    }

    async fn list_schedules(&self) -> Result<Vec<Schedule>, AutoEdgeError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT data FROM schedules ORDER BY spec_id")
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)?;
        decode_all(&rows)
    }
}

#[cfg(test)]
mod tests {
    use autoedge_domain::circuit::CircuitStatus;
    use autoedge_domain::time;

    use super::*;
    use crate::store::memory;

    #[tokio::test]
    async fn should_overwrite_circuit_state_per_target() {
        let store = memory().await;
        let mut circuit = CircuitState::closed("entity:light.hall");
        store.save_circuit(&circuit).await.unwrap();
        circuit.state = CircuitStatus::Open;
        circuit.consecutive_failures = 5;
        circuit.opened_at = Some(time::now());
        store.save_circuit(&circuit).await.unwrap();

        let circuits = store.list_circuits().await.unwrap();

        assert_eq!(circuits, vec![circuit]);
    }

    #[tokio::test]
    async fn should_persist_rollout_stage_changes() {
        let store = memory().await;
        let spec_id = SpecId::new();
        let now = time::now();
        let mut rollout = RolloutState::deployed(spec_id, 1, None, now);
        store.save_rollout(&rollout).await.unwrap();
        rollout.set_canary(2, 10, now).unwrap();
        store.save_rollout(&rollout).await.unwrap();

        let stored = store.get_rollout(spec_id).await.unwrap().unwrap();

        assert_eq!(stored, rollout);
        assert_eq!(store.list_rollouts().await.unwrap().len(), 1);
        assert!(store.get_rollout(SpecId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn should_default_kill_switch_to_released() {
        let store = memory().await;
        assert_eq!(store.get_kill_switch().await.unwrap(), KillSwitch::default());

        let engaged = KillSwitch {
            engaged: true,
            changed_at: Some(time::now()),
        };
        store.save_kill_switch(&engaged).await.unwrap();

        assert_eq!(store.get_kill_switch().await.unwrap(), engaged);
    }

    #[tokio::test]
    async fn should_store_schedule_by_spec() {
        let store = memory().await;
        let spec_id = SpecId::new();
        let mut schedule = Schedule::enabled(spec_id, "0 8 * * *", time::now()).unwrap();
        store.save_schedule(&schedule).await.unwrap();
        schedule.disable();
        store.save_schedule(&schedule).await.unwrap();

        let stored = store.get_schedule(spec_id).await.unwrap().unwrap();

        assert!(!stored.enabled);
        assert_eq!(store.list_schedules().await.unwrap(), vec![stored]);
    }
}
