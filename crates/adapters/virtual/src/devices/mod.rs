//! Simulated devices: light, switch, sensor, lock and thermostat.

mod light;
mod lock;
mod sensor;
mod switch;
mod thermostat;

pub use light::VirtualLight;
pub use lock::VirtualLock;
pub use sensor::VirtualSensor;
pub use switch::VirtualSwitch;
pub use thermostat::VirtualThermostat;

use serde_json::{Map, Value};

use autoedge_domain::capability::{ParamSchema, RemoteEntity, RemoteService};
use autoedge_domain::error::{RemoteError, RemoteErrorKind};
use autoedge_domain::state::EntityState;

/// Services of a device domain with their declared fields.
pub type ServiceTable = Vec<(&'static str, Vec<(&'static str, ParamSchema)>)>;

pub enum VirtualDevice {
    Light(VirtualLight),
    Switch(VirtualSwitch),
    Sensor(VirtualSensor),
    Lock(VirtualLock),
    Thermostat(VirtualThermostat),
}

impl VirtualDevice {
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Light(d) => d.entity_id(),
            Self::Switch(d) => d.entity_id(),
            Self::Sensor(d) => d.entity_id(),
            Self::Lock(d) => d.entity_id(),
            Self::Thermostat(d) => d.entity_id(),
        }
    }

    pub fn snapshot(&self) -> RemoteEntity {
        match self {
            Self::Light(d) => d.snapshot(),
            Self::Switch(d) => d.snapshot(),
            Self::Sensor(d) => d.snapshot(),
            Self::Lock(d) => d.snapshot(),
            Self::Thermostat(d) => d.snapshot(),
        }
    }

    pub fn state(&self) -> EntityState {
        match self {
            Self::Light(d) => d.state(),
            Self::Switch(d) => d.state(),
            Self::Sensor(d) => d.state(),
            Self::Lock(d) => d.state(),
            Self::Thermostat(d) => d.state(),
        }
    }

    /// # Errors
    ///
    /// Returns a `Rejected` error for services the device does not offer
    /// or data it cannot apply.
    pub fn apply(&mut self, service: &str, data: &Map<String, Value>) -> Result<(), RemoteError> {
        match self {
            Self::Light(d) => d.apply(service, data),
            Self::Switch(d) => d.apply(service, data),
            Self::Lock(d) => d.apply(service, data),
            Self::Thermostat(d) => d.apply(service, data),
            Self::Sensor(d) => Err(unsupported(d.entity_id(), service)),
        }
    }
}

/// Every service the simulated platform advertises, grouped by domain.
pub fn catalogue() -> Vec<RemoteService> {
    [
        ("light", VirtualLight::services()),
        ("switch", VirtualSwitch::services()),
        ("lock", VirtualLock::services()),
        ("climate", VirtualThermostat::services()),
    ]
    .into_iter()
    .flat_map(|(domain, table)| {
        table.into_iter().map(move |(service, fields)| RemoteService {
            domain: domain.to_string(),
            service: service.to_string(),
            fields: fields
                .into_iter()
                .map(|(name, schema)| (name.to_string(), schema))
                .collect(),
        })
    })
    .collect()
}

pub(crate) fn unsupported(entity_id: &str, service: &str) -> RemoteError {
    RemoteError::new(
        RemoteErrorKind::Rejected,
        format!("{entity_id} does not support {service}"),
    )
}
