//! Virtual door lock — `lock`, `unlock`.

use serde_json::{Map, Value, json};

use autoedge_domain::capability::RemoteEntity;
use autoedge_domain::error::RemoteError;
use autoedge_domain::state::EntityState;

use super::{ServiceTable, unsupported};

pub struct VirtualLock {
    entity_id: String,
    name: String,
    locked: bool,
}

impl VirtualLock {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            locked: true,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn services() -> ServiceTable {
        vec![("lock", Vec::new()), ("unlock", Vec::new())]
    }

    pub fn snapshot(&self) -> RemoteEntity {
        let mut attributes = Map::new();
        attributes.insert("friendly_name".to_string(), json!(self.name));
        RemoteEntity {
            entity_id: self.entity_id.clone(),
            name: Some(self.name.clone()),
            state: self.state(),
            attributes,
        }
    }

    pub fn state(&self) -> EntityState {
        EntityState::from(if self.locked { "locked" } else { "unlocked" })
    }

    pub fn apply(&mut self, service: &str, _data: &Map<String, Value>) -> Result<(), RemoteError> {
        match service {
            "lock" => self.locked = true,
            "unlock" => self.locked = false,
            other => return Err(unsupported(&self.entity_id, other)),
        }
        Ok(())
    }
}
