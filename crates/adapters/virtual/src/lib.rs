//! # autoedge-adapter-virtual
//!
//! Simulated, in-memory remote platform for demo mode and integration tests.
//!
//! ## Provided devices (see [`VirtualPlatform::demo`])
//!
//! | Entity | Services |
//! |--------|----------|
//! | `light.hall`, `light.kitchen` | `turn_on` (`brightness`), `turn_off`, `toggle` |
//! | `switch.coffee_maker` | `turn_on`, `turn_off`, `toggle` |
//! | `sensor.outdoor_temperature` | read-only |
//! | `lock.front_door` | `lock`, `unlock` |
//! | `climate.living_room` | `set_temperature`, `set_hvac_mode` |
//!
//! Every state transition is broadcast as a
//! [`StateChange`](autoedge_domain::spec::StateChange) so it can be fed to
//! the trigger router.
//!
//! ## Dependency rule
//!
//! Depends on `autoedge-app` (port traits) and `autoedge-domain` only.

pub mod devices;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use autoedge_app::ports::{RemotePlatform, ServiceOutcome};
use autoedge_domain::capability::{Inventory, entity_domain};
use autoedge_domain::error::{RemoteError, RemoteErrorKind};
use autoedge_domain::plan::ResolvedCall;
use autoedge_domain::spec::StateChange;
use autoedge_domain::state::EntityState;
use autoedge_domain::time;

use devices::{
    VirtualDevice, VirtualLight, VirtualLock, VirtualSensor, VirtualSwitch, VirtualThermostat,
    catalogue,
};

const CHANGE_CAPACITY: usize = 256;

struct Slot {
    device: VirtualDevice,
    available: bool,
}

/// In-memory [`RemotePlatform`].
pub struct VirtualPlatform {
    devices: Mutex<BTreeMap<String, Slot>>,
    changes: broadcast::Sender<StateChange>,
    sequence: AtomicU64,
    invocations: AtomicUsize,
}

impl Default for VirtualPlatform {
    fn default() -> Self {
        Self::demo()
    }
}

impl VirtualPlatform {
    #[must_use]
    pub fn new(devices: impl IntoIterator<Item = VirtualDevice>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            devices: Mutex::new(
                devices
                    .into_iter()
                    .map(|device| {
                        (
                            device.entity_id().to_string(),
                            Slot {
                                device,
                                available: true,
                            },
                        )
                    })
                    .collect(),
            ),
            changes,
            sequence: AtomicU64::new(0),
            invocations: AtomicUsize::new(0),
        }
    }

    /// A small home with one device of every kind.
    #[must_use]
    pub fn demo() -> Self {
        Self::new([
            VirtualDevice::Light(VirtualLight::new("light.hall", "Hall")),
            VirtualDevice::Light(VirtualLight::new("light.kitchen", "Kitchen")),
            VirtualDevice::Switch(VirtualSwitch::new("switch.coffee_maker", "Coffee maker")),
            VirtualDevice::Sensor(VirtualSensor::new(
                "sensor.outdoor_temperature",
                "Outdoor temperature",
                12.5,
            )),
            VirtualDevice::Lock(VirtualLock::new("lock.front_door", "Front door")),
            VirtualDevice::Thermostat(VirtualThermostat::new(
                "climate.living_room",
                "Living room",
            )),
        ])
    }

    /// Receive every state transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Update a sensor reading. Returns `false` when no such sensor exists.
    pub fn set_reading(&self, entity_id: &str, reading: f64) -> bool {
        let mut devices = self.lock();
        let Some(Slot {
            device: VirtualDevice::Sensor(sensor),
            ..
        }) = devices.get_mut(entity_id)
        else {
            return false;
        };
        let before = sensor.state();
        sensor.set_reading(reading);
        let after = sensor.state();
        drop(devices);
        self.announce(entity_id, before, after);
        true
    }

    /// Mark an entity reachable or not. Unreachable entities report
    /// `unavailable` and refuse service calls with a retryable error.
    pub fn set_available(&self, entity_id: &str, available: bool) -> bool {
        let mut devices = self.lock();
        let Some(slot) = devices.get_mut(entity_id) else {
            return false;
        };
        let before = slot.state();
        slot.available = available;
        let after = slot.state();
        drop(devices);
        self.announce(entity_id, before, after);
        true
    }

    /// Number of service calls received, refused ones included.
    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Slot>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn announce(&self, entity_id: &str, from: EntityState, to: EntityState) {
        if from == to {
            return;
        }
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let change = StateChange {
            event_id: format!("virtual-{sequence}"),
            entity_id: entity_id.to_string(),
            from: Some(from),
            to,
            fired_at: Some(time::now()),
        };
        tracing::debug!(entity_id, event_id = %change.event_id, to = %change.to, "virtual state changed");
        // no subscriber is not an error
        let _ = self.changes.send(change);
    }
}

impl Slot {
    fn state(&self) -> EntityState {
        if self.available {
            self.device.state()
        } else {
            EntityState::Unavailable
        }
    }
}

fn validate(call: &ResolvedCall) -> Result<(), RemoteError> {
    let rejected = |message: String| RemoteError::new(RemoteErrorKind::Rejected, message);
    let service = catalogue()
        .into_iter()
        .find(|s| s.domain == call.domain && s.service == call.service)
        .ok_or_else(|| {
            RemoteError::new(
                RemoteErrorKind::NotFound,
                format!("unknown service {}.{}", call.domain, call.service),
            )
        })?;
    if let Some(field) = call.data.keys().find(|k| !service.fields.contains_key(*k)) {
        return Err(rejected(format!("unexpected field {field}")));
    }
    for (name, schema) in &service.fields {
        match call.data.get(name) {
            Some(value) => schema
                .check(value)
                .map_err(|reason| rejected(format!("{name}: {reason}")))?,
            None if schema.required => return Err(rejected(format!("missing field {name}"))),
            None => {}
        }
    }
    Ok(())
}

impl RemotePlatform for VirtualPlatform {
    async fn inventory(&self) -> Result<Inventory, RemoteError> {
        let entities = self
            .lock()
            .values()
            .map(|slot| {
                let mut entity = slot.device.snapshot();
                entity.state = slot.state();
                entity
            })
            .collect();
        Ok(Inventory {
            entities,
            services: catalogue(),
        })
    }

    async fn entity_state(&self, entity_id: &str) -> Result<EntityState, RemoteError> {
        self.lock().get(entity_id).map(Slot::state).ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::NotFound, format!("unknown entity {entity_id}"))
        })
    }

    #[tracing::instrument(skip(self, call), fields(call = %call))]
    async fn invoke(&self, call: &ResolvedCall) -> Result<ServiceOutcome, RemoteError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        validate(call)?;
        let Some(entity_id) = call.entity_id.as_deref() else {
            return Ok(ServiceOutcome::default());
        };
        let mut devices = self.lock();
        let slot = devices.get_mut(entity_id).ok_or_else(|| {
            RemoteError::new(RemoteErrorKind::NotFound, format!("unknown entity {entity_id}"))
        })?;
        if !slot.available {
            return Err(RemoteError::new(
                RemoteErrorKind::Unavailable,
                format!("{entity_id} is unavailable"),
            ));
        }
        if entity_domain(entity_id) != call.domain {
            return Err(devices::unsupported(entity_id, &call.service));
        }
        let before = slot.state();
        slot.device.apply(&call.service, &call.data)?;
        let after = slot.state();
        drop(devices);
        self.announce(entity_id, before, after.clone());
        Ok(ServiceOutcome {
            resulting_state: Some(after),
        })
    }
}
