//! Condition — a guard that must hold for the spec's actions to run.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::state::EntityState;
use crate::target::TargetRef;

/// A predicate evaluated at execution time, after the trigger fired.
///
/// All conditions of a spec must be satisfied (logical AND).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Requires a specific entity to be in a given state.
    StateIs { target: TargetRef, state: EntityState },
    /// Requires the current UTC time to be within a window.
    TimeRange {
        /// Start of the window, `HH:MM` in 24-hour format.
        after: String,
        /// End of the window, `HH:MM` in 24-hour format.
        before: String,
    },
}

impl Condition {
    /// Target referenced by this condition, if any.
    #[must_use]
    pub fn target(&self) -> Option<&TargetRef> {
        match self {
            Self::StateIs { target, .. } => Some(target),
            Self::TimeRange { .. } => None,
        }
    }

    /// Structural checks that do not need the capability graph.
    #[must_use]
    pub fn structural_errors(&self) -> Vec<ValidationError> {
        match self {
            Self::StateIs { target, .. } if target.entity_id().is_none() => {
                vec![ValidationError::InvalidCondition {
                    reference: self.to_string(),
                    reason: "state_is must reference an entity".to_string(),
                }]
            }
            Self::StateIs { .. } => Vec::new(),
            Self::TimeRange { after, before } => [after, before]
                .into_iter()
                .filter(|value| !is_clock_time(value))
                .map(|value| ValidationError::InvalidCondition {
                    reference: self.to_string(),
                    reason: format!("{value:?} is not a HH:MM time"),
                })
                .collect(),
        }
    }
}

/// Whether `now` (formatted `HH:MM`) falls within the window.
///
/// When `after > before` the window wraps past midnight (e.g. `22:00..06:00`).
#[must_use]
pub fn time_range_contains(after: &str, before: &str, now: &str) -> bool {
    if after <= before {
        now >= after && now <= before
    } else {
        now >= after || now <= before
    }
}

fn is_clock_time(value: &str) -> bool {
    let Some((hours, minutes)) = value.split_once(':') else {
        return false;
    };
    hours.len() == 2
        && minutes.len() == 2
        && hours.parse::<u8>().is_ok_and(|h| h < 24)
        && minutes.parse::<u8>().is_ok_and(|m| m < 60)
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateIs { target, state } => write!(f, "state_is({target}, {state})"),
            Self::TimeRange { after, before } => write!(f, "time_range({after}..{before})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_display_state_is_condition() {
        let c = Condition::StateIs {
            target: TargetRef::entity("light.hall"),
            state: EntityState::On,
        };
        assert_eq!(c.to_string(), "state_is(entity:light.hall, on)");
    }

    #[test]
    fn should_contain_time_in_same_day_window() {
        assert!(time_range_contains("08:00", "22:00", "12:30"));
        assert!(!time_range_contains("08:00", "22:00", "23:00"));
    }

    #[test]
    fn should_contain_time_in_overnight_window() {
        assert!(time_range_contains("22:00", "06:00", "23:15"));
        assert!(time_range_contains("22:00", "06:00", "05:59"));
        assert!(!time_range_contains("22:00", "06:00", "12:00"));
    }

    #[test]
    fn should_reject_malformed_time_range() {
        let c = Condition::TimeRange {
            after: "8am".to_string(),
            before: "25:00".to_string(),
        };
        assert_eq!(c.structural_errors().len(), 2);
    }

    #[test]
    fn should_accept_well_formed_time_range() {
        let c = Condition::TimeRange {
            after: "08:00".to_string(),
            before: "22:00".to_string(),
        };
        assert!(c.structural_errors().is_empty());
    }

    #[test]
    fn should_deserialize_state_is_from_tagged_json() {
        let json = serde_json::json!({
            "type": "state_is",
            "target": "entity:lock.front_door",
            "state": "locked"
        });
        let c: Condition = serde_json::from_value(json).unwrap();
        assert!(matches!(
            c,
            Condition::StateIs { state: EntityState::Other(ref s), .. } if s == "locked"
        ));
    }
}
