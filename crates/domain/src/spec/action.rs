//! Action — the effect a spec applies on the remote platform.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::target::TargetRef;

/// An operation executed when the spec fires and all conditions hold.
///
/// Each variant carries its own typed payload; [`CallService`](Self::CallService)
/// is the escape hatch for services without a dedicated variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// `turn_on`, optionally with a brightness (0–255).
    TurnOn {
        target: TargetRef,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        brightness: Option<u8>,
    },
    /// `turn_off`.
    TurnOff { target: TargetRef },
    /// `toggle`.
    Toggle { target: TargetRef },
    /// `set_temperature` on a climate entity.
    SetTemperature { target: TargetRef, temperature: f64 },
    /// Invoke an arbitrary service with free-form parameters.
    CallService {
        target: TargetRef,
        /// Service name within the target's domain, e.g. `"lock"`.
        service: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    /// Wait before continuing to the next action.
    Delay { seconds: u64 },
}

impl Action {
    /// Target of the action; `None` for [`Delay`](Self::Delay).
    #[must_use]
    pub fn target(&self) -> Option<&TargetRef> {
        match self {
            Self::TurnOn { target, .. }
            | Self::TurnOff { target }
            | Self::Toggle { target }
            | Self::SetTemperature { target, .. }
            | Self::CallService { target, .. } => Some(target),
            Self::Delay { .. } => None,
        }
    }

    /// Name of the remote service the action invokes.
    ///
    /// For a `service:` target the service is already part of the reference.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        if let Some(TargetRef::Service { service, .. }) = self.target() {
            return Some(service);
        }
        match self {
            Self::TurnOn { .. } => Some("turn_on"),
            Self::TurnOff { .. } => Some("turn_off"),
            Self::Toggle { .. } => Some("toggle"),
            Self::SetTemperature { .. } => Some("set_temperature"),
            Self::CallService { service, .. } => Some(service),
            Self::Delay { .. } => None,
        }
    }

    /// Parameters sent along with the service call.
    #[must_use]
    pub fn parameters(&self) -> Map<String, Value> {
        let mut params = Map::new();
        match self {
            Self::TurnOn {
                brightness: Some(brightness),
                ..
            } => {
                params.insert("brightness".to_string(), Value::from(*brightness));
            }
            Self::SetTemperature { temperature, .. } => {
                params.insert("temperature".to_string(), Value::from(*temperature));
            }
            Self::CallService { data, .. } => params.clone_from(data),
            Self::TurnOn { .. } | Self::TurnOff { .. } | Self::Toggle { .. } | Self::Delay { .. } => {}
        }
        params
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delay { seconds } => write!(f, "delay({seconds}s)"),
            other => {
                let service = other.service_name().unwrap_or_default();
                match other.target() {
                    Some(target) => write!(f, "{service}({target})"),
                    None => f.write_str(service),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_turn_on_action() {
        let a = Action::TurnOn {
            target: TargetRef::entity("light.kitchen"),
            brightness: None,
        };
        assert_eq!(a.to_string(), "turn_on(entity:light.kitchen)");
    }

    #[test]
    fn should_display_delay_action() {
        let a = Action::Delay { seconds: 30 };
        assert_eq!(a.to_string(), "delay(30s)");
    }

    #[test]
    fn should_expose_brightness_as_parameter() {
        let a = Action::TurnOn {
            target: TargetRef::entity("light.kitchen"),
            brightness: Some(128),
        };
        assert_eq!(a.parameters()["brightness"], 128);
    }

    #[test]
    fn should_use_service_from_service_target() {
        let a = Action::CallService {
            target: TargetRef::service("scene", "turn_on"),
            service: "ignored".to_string(),
            data: Map::new(),
        };
        assert_eq!(a.service_name(), Some("turn_on"));
    }

    #[test]
    fn should_deserialize_call_service_with_default_data() {
        let json = serde_json::json!({
            "type": "call_service",
            "target": "entity:lock.front_door",
            "service": "lock"
        });
        let a: Action = serde_json::from_value(json).unwrap();
        assert_eq!(a.service_name(), Some("lock"));
        assert!(a.parameters().is_empty());
    }

    #[test]
    fn should_deserialize_set_temperature_from_tagged_json() {
        let json = serde_json::json!({
            "type": "set_temperature",
            "target": "entity:climate.living_room",
            "temperature": 21.5
        });
        let a: Action = serde_json::from_value(json).unwrap();
        assert_eq!(a.parameters()["temperature"], 21.5);
        assert_eq!(a.service_name(), Some("set_temperature"));
    }

    #[test]
    fn should_have_no_target_for_delay() {
        let a = Action::Delay { seconds: 5 };
        assert!(a.target().is_none());
        assert!(a.service_name().is_none());
    }
}
