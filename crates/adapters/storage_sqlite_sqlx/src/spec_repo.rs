//! `SQLite` implementation of [`SpecRepository`].

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};

use autoedge_app::ports::SpecRepository;
use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::id::SpecId;
use autoedge_domain::spec::AutomationSpec;

use crate::codec::{from_json, from_sql_int, parse, parse_timestamp, timestamp, to_json};
use crate::error::StorageError;
use crate::store::SqliteStorage;

struct Wrapper(AutomationSpec);

impl Wrapper {
    fn maybe(value: Option<Self>) -> Option<AutomationSpec> {
        value.map(|w| w.0)
    }
}

impl<'r> FromRow<'r, SqliteRow> for Wrapper {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let version: i64 = row.try_get("version")?;
        let trigger_json: String = row.try_get("trigger_data")?;
        let conditions_json: String = row.try_get("conditions")?;
        let actions_json: String = row.try_get("actions")?;
        let tags_json: String = row.try_get("policy_tags")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Self(AutomationSpec {
            id: parse(&id)?,
            version: from_sql_int(version)?,
            name: row.try_get("name")?,
            trigger: from_json(&trigger_json)?,
            conditions: from_json(&conditions_json)?,
            actions: from_json(&actions_json)?,
            policy_tags: from_json(&tags_json)?,
            created_at: parse_timestamp(&created_at)?,
        }))
    }
}

impl SpecRepository for SqliteStorage {
    async fn insert_spec_version(&self, spec: &AutomationSpec) -> Result<(), AutoEdgeError> {
        sqlx::query(
            "INSERT INTO spec_versions (id, version, name, trigger_data, conditions, actions, policy_tags, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(spec.id.to_string())
        .bind(i64::from(spec.version))
        .bind(&spec.name)
        .bind(to_json(&spec.trigger)?)
        .bind(to_json(&spec.conditions)?)
        .bind(to_json(&spec.actions)?)
        .bind(to_json(&spec.policy_tags)?)
        .bind(timestamp(spec.created_at))
        .execute(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(())
    }

    async fn get_spec_version(
        &self,
        id: SpecId,
        version: u32,
    ) -> Result<Option<AutomationSpec>, AutoEdgeError> {
        let row: Option<Wrapper> =
            sqlx::query_as("SELECT * FROM spec_versions WHERE id = ? AND version = ?")
                .bind(id.to_string())
                .bind(i64::from(version))
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(Wrapper::maybe(row))
    }

    async fn latest_spec_version(&self, id: SpecId) -> Result<Option<AutomationSpec>, AutoEdgeError> {
        let row: Option<Wrapper> = sqlx::query_as(
            "SELECT * FROM spec_versions WHERE id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(Wrapper::maybe(row))
    }

    async fn list_spec_versions(&self, id: SpecId) -> Result<Vec<AutomationSpec>, AutoEdgeError> {
        let rows: Vec<Wrapper> =
            sqlx::query_as("SELECT * FROM spec_versions WHERE id = ? ORDER BY version")
                .bind(id.to_string())
                .fetch_all(&self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(rows.into_iter().map(|w| w.0).collect())
    }
}
