//! Wire shapes of the platform's REST API and their mapping to the domain.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use autoedge_domain::capability::{ParamKind, ParamSchema, RemoteEntity, RemoteService};
use autoedge_domain::state::EntityState;

/// One element of `GET /api/states` (and `GET /api/states/{id}`).
#[derive(Debug, Deserialize)]
pub(crate) struct StateDto {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl From<StateDto> for RemoteEntity {
    fn from(dto: StateDto) -> Self {
        Self {
            name: dto
                .attributes
                .get("friendly_name")
                .and_then(Value::as_str)
                .map(str::to_string),
            state: EntityState::from(dto.state),
            entity_id: dto.entity_id,
            attributes: dto.attributes,
        }
    }
}

/// One element of `GET /api/services`: every service of a domain.
#[derive(Debug, Deserialize)]
pub(crate) struct DomainDto {
    pub domain: String,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDto>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ServiceDto {
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDto>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct FieldDto {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub selector: Option<Map<String, Value>>,
}

impl DomainDto {
    pub(crate) fn into_services(self) -> impl Iterator<Item = RemoteService> {
        let domain = self.domain;
        self.services.into_iter().map(move |(service, dto)| RemoteService {
            domain: domain.clone(),
            service,
            fields: dto
                .fields
                .into_iter()
                .map(|(name, field)| (name, field.schema()))
                .collect(),
        })
    }
}

impl FieldDto {
    fn schema(&self) -> ParamSchema {
        let kind = self
            .selector
            .as_ref()
            .and_then(|selector| selector.iter().next())
            .map_or(ParamKind::Any, |(name, config)| selector_kind(name, config));
        ParamSchema {
            kind,
            required: self.required,
        }
    }
}

fn selector_kind(name: &str, config: &Value) -> ParamKind {
    match name {
        "boolean" => ParamKind::Boolean,
        "text" => ParamKind::Text,
        "number" => number_kind(config),
        "select" => ParamKind::Choice {
            options: config
                .get("options")
                .and_then(Value::as_array)
                .map(|options| options.iter().filter_map(option_value).collect())
                .unwrap_or_default(),
        },
        _ => ParamKind::Any,
    }
}

/// Integer when the bounds and step are whole numbers.
fn number_kind(config: &Value) -> ParamKind {
    let min = config.get("min");
    let max = config.get("max");
    let step = config.get("step").and_then(Value::as_f64).unwrap_or(1.0);
    let whole = |v: Option<&Value>| v.is_none_or(|v| v.as_i64().is_some());
    if whole(min) && whole(max) && step.fract().abs() < f64::EPSILON {
        ParamKind::Integer {
            min: min.and_then(Value::as_i64),
            max: max.and_then(Value::as_i64),
        }
    } else {
        ParamKind::Number {
            min: min.and_then(Value::as_f64),
            max: max.and_then(Value::as_f64),
        }
    }
}

fn option_value(option: &Value) -> Option<String> {
    match option {
        Value::String(value) => Some(value.clone()),
        Value::Object(map) => map.get("value").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}
