//! Trigger — what makes a spec fire.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::schedule;
use crate::state::EntityState;
use crate::target::TargetRef;
use crate::time::Timestamp;

/// Describes what activates a spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires on a cron pattern, evaluated by the scheduler (e.g. `"0 8 * * *"`).
    Cron { expression: String },
    /// Fires when a remote entity reports a state change.
    StateChanged {
        target: TargetRef,
        /// Optional: only match if transitioning *from* this state.
        #[serde(default)]
        from: Option<EntityState>,
        /// Optional: only match if transitioning *to* this state.
        #[serde(default)]
        to: Option<EntityState>,
    },
    /// Fires only when executed explicitly through the API.
    Manual,
}

/// A state change reported by the remote platform's event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Platform-assigned identifier of the event, used as trigger identity.
    pub event_id: String,
    pub entity_id: String,
    #[serde(default)]
    pub from: Option<EntityState>,
    pub to: EntityState,
    #[serde(default)]
    pub fired_at: Option<Timestamp>,
}

impl StateChange {
    /// Stable identity of the triggering occurrence.
    #[must_use]
    pub fn trigger_identity(&self) -> String {
        format!("event:{}", self.event_id)
    }
}

impl Trigger {
    /// Check whether this trigger matches a reported state change.
    ///
    /// `Cron` and `Manual` triggers never match events;
    /// they are activated through other mechanisms.
    #[must_use]
    pub fn matches_event(&self, event: &StateChange) -> bool {
        match self {
            Self::StateChanged { target, from, to } => {
                if target.entity_id() != Some(event.entity_id.as_str()) {
                    return false;
                }
                let from_matches = from
                    .as_ref()
                    .is_none_or(|expected| event.from.as_ref() == Some(expected));
                let to_matches = to.as_ref().is_none_or(|expected| &event.to == expected);
                from_matches && to_matches
            }
            Self::Cron { .. } | Self::Manual => false,
        }
    }

    /// The cron expression, for scheduler-driven triggers.
    #[must_use]
    pub fn cron_expression(&self) -> Option<&str> {
        match self {
            Self::Cron { expression } => Some(expression),
            _ => None,
        }
    }

    /// Targets referenced by this trigger.
    #[must_use]
    pub fn target(&self) -> Option<&TargetRef> {
        match self {
            Self::StateChanged { target, .. } => Some(target),
            Self::Cron { .. } | Self::Manual => None,
        }
    }

    /// Structural checks that do not need the capability graph.
    #[must_use]
    pub fn structural_errors(&self) -> Vec<ValidationError> {
        match self {
            Self::Cron { expression } => match schedule::parse(expression) {
                Ok(_) => Vec::new(),
                Err(reason) => vec![ValidationError::InvalidTrigger {
                    reference: self.to_string(),
                    reason,
                }],
            },
            Self::StateChanged { target, .. } if target.entity_id().is_none() => {
                vec![ValidationError::InvalidTrigger {
                    reference: self.to_string(),
                    reason: "state_changed triggers must watch an entity".to_string(),
                }]
            }
            Self::StateChanged { .. } | Self::Manual => Vec::new(),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateChanged { target, .. } => write!(f, "state_changed({target})"),
            Self::Cron { expression } => write!(f, "cron({expression})"),
            Self::Manual => f.write_str("manual"),
        }
    }
}
