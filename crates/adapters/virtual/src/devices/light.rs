//! Virtual dimmable light — `turn_on` (with optional brightness), `turn_off`, `toggle`.

use serde_json::{Map, Value, json};

use autoedge_domain::capability::{ParamKind, ParamSchema, RemoteEntity};
use autoedge_domain::error::RemoteError;
use autoedge_domain::state::EntityState;

use super::{ServiceTable, unsupported};

pub struct VirtualLight {
    entity_id: String,
    name: String,
    on: bool,
    brightness: u8,
}

impl VirtualLight {
    #[must_use]
    pub fn new(entity_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            name: name.into(),
            on: false,
            brightness: 255,
        }
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn services() -> ServiceTable {
        vec![
            (
                "turn_on",
                vec![(
                    "brightness",
                    ParamSchema::optional(ParamKind::Integer {
                        min: Some(0),
                        max: Some(255),
                    }),
                )],
            ),
            ("turn_off", Vec::new()),
            ("toggle", Vec::new()),
        ]
    }

    pub fn snapshot(&self) -> RemoteEntity {
        let mut attributes = Map::new();
        attributes.insert("friendly_name".to_string(), json!(self.name));
        if self.on {
            attributes.insert("brightness".to_string(), json!(self.brightness));
        }
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

    /// # Errors
    ///
    /// Returns a `Rejected` error for services the light does not offer.
    pub fn apply(&mut self, service: &str, data: &Map<String, Value>) -> Result<(), RemoteError> {
        match service {
            "turn_on" => {
                self.on = true;
                if let Some(brightness) = data
                    .get("brightness")
                    .and_then(Value::as_u64)
                    .and_then(|b| u8::try_from(b).ok())
                {
                    self.brightness = brightness;
                }
            }
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

    fn light() -> VirtualLight {
        VirtualLight::new("light.hall", "Hall")
    }

    #[test]
    fn should_default_to_off() {
        assert_eq!(light().state(), EntityState::Off);
    }

    #[test]
    fn should_turn_on_with_brightness() {
        let mut light = light();
        let mut data = Map::new();
        data.insert("brightness".to_string(), json!(80));

        light.apply("turn_on", &data).unwrap();

        let snapshot = light.snapshot();
        assert_eq!(snapshot.state, EntityState::On);
        assert_eq!(snapshot.attributes["brightness"], json!(80));
    }

    #[test]
    fn should_toggle_back_and_forth() {
        let mut light = light();
        light.apply("toggle", &Map::new()).unwrap();
        assert_eq!(light.state(), EntityState::On);
        light.apply("toggle", &Map::new()).unwrap();
        assert_eq!(light.state(), EntityState::Off);
    }

    #[test]
    fn should_reject_unknown_service() {
        let err = light().apply("set_color", &Map::new()).unwrap_err();
        assert!(!err.is_retryable());
    }
}
