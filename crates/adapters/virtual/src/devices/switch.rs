//! Virtual switch — `turn_on`, `turn_off`, `toggle`.

use serde_json::{Map, Value, json};

use autoedge_domain::capability::RemoteEntity;
use autoedge_domain::error::RemoteError;
use autoedge_domain::state::EntityState;

use super::{ServiceTable, unsupported};

pub struct VirtualSwitch {
    entity_id: String,
    name: String,
    on: bool,
}

impl VirtualSwitch {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            on: false,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn services() -> ServiceTable {
        vec![
            ("turn_on", Vec::new()),
            ("turn_off", Vec::new()),
            ("toggle", Vec::new()),
        ]
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
        if self.on { EntityState::On } else { EntityState::Off }
    }

    pub fn apply(&mut self, service: &str, _data: &Map<String, Value>) -> Result<(), RemoteError> {
        match service {
            "turn_on" => self.on = true,
            "turn_off" => self.on = false,
            "toggle" => self.on = !self.on,
            other => return Err(unsupported(&self.entity_id, other)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_turn_on_and_off() {
        let mut switch = VirtualSwitch::new("switch.coffee", "Coffee");
        switch.apply("turn_on", &Map::new()).unwrap();
        assert_eq!(switch.state(), EntityState::On);
        switch.apply("turn_off", &Map::new()).unwrap();
        assert_eq!(switch.state(), EntityState::Off);
    }
}
