//! Virtual temperature sensor. Read-only: the reading changes through
//! [`VirtualSensor::set_reading`], never through a service call.

use serde_json::{Map, json};

use autoedge_domain::capability::RemoteEntity;
use autoedge_domain::state::EntityState;

pub struct VirtualSensor {
    entity_id: String,
    name: String,
    reading: f64,
    unit: &'static str,
}

impl VirtualSensor {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, name: impl Into<String>, reading: f64) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            reading,
            unit: "\u{b0}C",
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn set_reading(&mut self, reading: f64) {
        self.reading = reading;
    }

    pub fn snapshot(&self) -> RemoteEntity {
        let mut attributes = Map::new();
        attributes.insert("friendly_name".to_string(), json!(self.name));
        attributes.insert("unit_of_measurement".to_string(), json!(self.unit));
        RemoteEntity {
            entity_id: self.entity_id.clone(),
            name: Some(self.name.clone()),
            state: self.state(),
            attributes,
        }
    }

    pub fn state(&self) -> EntityState {
        EntityState::from(self.reading.to_string())
    }
}
