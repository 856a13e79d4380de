//! Virtual thermostat — `set_temperature`, `set_hvac_mode`.
//!
//! The entity state is the HVAC mode (`off`, `heat`, `cool`); the target
//! temperature is reported as an attribute.

use serde_json::{Map, Value, json};

use autoedge_domain::capability::{ParamKind, ParamSchema, RemoteEntity};
use autoedge_domain::error::{RemoteError, RemoteErrorKind};
use autoedge_domain::state::EntityState;

use super::{ServiceTable, unsupported};

const MODES: [&str; 3] = ["off", "heat", "cool"];
const MIN_TEMPERATURE: f64 = 7.0;
const MAX_TEMPERATURE: f64 = 35.0;

pub struct VirtualThermostat {
    entity_id: String,
    name: String,
    mode: &'static str,
    target_temperature: f64,
}

impl VirtualThermostat {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            mode: "off",
            target_temperature: 20.0,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn services() -> ServiceTable {
        vec![
            (
                "set_temperature",
                vec![(
                    "temperature",
                    ParamSchema::required(ParamKind::Number {
                        min: Some(MIN_TEMPERATURE),
                        max: Some(MAX_TEMPERATURE),
                    }),
                )],
            ),
            (
                "set_hvac_mode",
                vec![(
                    "hvac_mode",
                    ParamSchema::required(ParamKind::Choice {
                        options: MODES.iter().map(ToString::to_string).collect(),
                    }),
                )],
            ),
        ]
    }

    pub fn snapshot(&self) -> RemoteEntity {
        let mut attributes = Map::new();
        attributes.insert("friendly_name".to_string(), json!(self.name));
        attributes.insert("temperature".to_string(), json!(self.target_temperature));
        attributes.insert("hvac_modes".to_string(), json!(MODES));
        RemoteEntity {
            entity_id: self.entity_id.clone(),
            name: Some(self.name.clone()),
            state: self.state(),
            attributes,
        }
    }

    pub fn state(&self) -> EntityState {
        EntityState::from(self.mode)
    }

    pub fn apply(&mut self, service: &str, data: &Map<String, Value>) -> Result<(), RemoteError> {
        match service {
            "set_temperature" => {
                self.target_temperature = data
                    .get("temperature")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| missing(&self.entity_id, "temperature"))?;
            }
            "set_hvac_mode" => {
                let requested = data
                    .get("hvac_mode")
                    .and_then(Value::as_str)
                    .ok_or_else(|| missing(&self.entity_id, "hvac_mode"))?;
                self.mode = MODES
                    .into_iter()
                    .find(|mode| *mode == requested)
                    .ok_or_else(|| missing(&self.entity_id, "hvac_mode"))?;
            }
            other => return Err(unsupported(&self.entity_id, other)),
        }
        Ok(())
    }
}

fn missing(entity_id: &str, field: &str) -> RemoteError {
    RemoteError::new(
        RemoteErrorKind::Rejected,
        format!("{entity_id}: invalid or missing {field}"),
    )
}
