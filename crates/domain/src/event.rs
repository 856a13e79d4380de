//! Event — an immutable notification of something the engine did.
//!
//! Events feed the in-process bus and the SSE stream. They are not the
//! remote platform's state-change events (see [`StateChange`](crate::spec::StateChange)).

use serde::{Deserialize, Serialize};

use crate::id::EventId;
use crate::time::{Timestamp, now};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SpecDeployed,
    TaskStatusChanged,
    CircuitStateChanged,
    RolloutChanged,
    KillSwitchChanged,
    CapabilitiesRefreshed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub event_type: EventType,
    /// What the event is about: a task id, spec id or target reference.
    pub subject: Option<String>,
    pub timestamp: Timestamp,
    pub data: serde_json::Value,
}

impl Event {
    #[must_use]
    pub fn new(event_type: EventType, subject: Option<String>, data: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            subject,
            timestamp: now(),
            data,
        }
    }
}
