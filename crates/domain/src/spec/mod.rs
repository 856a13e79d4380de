//! Automation specs — typed, versioned trigger → condition → action documents.
//!
//! A spec id owns an append-only list of versions. Redeploying never
//! mutates a version; it registers the next one. Each version has a
//! [`Trigger`] that determines when it fires, optional [`Condition`]s that
//! must hold, one or more [`Action`]s, and policy tags consulted by the
//! planner.

mod action;
mod condition;
mod trigger;

pub use action::Action;
pub use condition::{Condition, time_range_contains};
pub use trigger::{StateChange, Trigger};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{AutoEdgeError, ValidationError};
use crate::id::SpecId;
use crate::target::TargetRef;
use crate::time::Timestamp;

/// The editable body of a spec, as submitted by the authoring side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecDocument {
    pub name: String,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub policy_tags: BTreeSet<String>,
}

/// One immutable version of an automation spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationSpec {
    pub id: SpecId,
    /// 1-based, monotonic per `id`.
    pub version: u32,
    pub name: String,
    pub trigger: Trigger,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub policy_tags: BTreeSet<String>,
    pub created_at: Timestamp,
}

impl AutomationSpec {
    /// Create a builder for constructing an [`AutomationSpec`].
    #[must_use]
    pub fn builder() -> AutomationSpecBuilder {
        AutomationSpecBuilder::default()
    }

    /// Bind a submitted document to an id and version.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::Validation`] when the document breaks a
    /// structural invariant (see [`validate`](Self::validate)).
    pub fn from_document(
        id: SpecId,
        version: u32,
        document: SpecDocument,
        created_at: Timestamp,
    ) -> Result<Self, AutoEdgeError> {
        let spec = Self {
            id,
            version,
            name: document.name,
            trigger: document.trigger,
            conditions: document.conditions,
            actions: document.actions,
            policy_tags: document.policy_tags,
            created_at,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Check the invariants every stored version must satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::Validation`] when:
    /// - `name` is empty ([`ValidationError::EmptyName`])
    /// - `actions` is empty ([`ValidationError::NoActions`])
    pub fn validate(&self) -> Result<(), AutoEdgeError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if self.actions.is_empty() {
            return Err(ValidationError::NoActions.into());
        }
        Ok(())
    }

    /// Every structural problem of the spec, collected without short-circuiting.
    #[must_use]
    pub fn structural_errors(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        if self.name.trim().is_empty() {
            errors.push(ValidationError::EmptyName);
        }
        if self.actions.is_empty() {
            errors.push(ValidationError::NoActions);
        }
        errors.extend(self.trigger.structural_errors());
        for condition in &self.conditions {
            errors.extend(condition.structural_errors());
        }
        errors
    }

    /// Distinct targets referenced anywhere in the spec, in first-seen order.
    #[must_use]
    pub fn referenced_targets(&self) -> Vec<&TargetRef> {
        let mut seen = BTreeSet::new();
        self.trigger
            .target()
            .into_iter()
            .chain(self.conditions.iter().filter_map(Condition::target))
            .chain(self.actions.iter().filter_map(Action::target))
            .filter(|target| seen.insert(*target))
            .collect()
    }

    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.policy_tags.contains(tag)
    }

    /// The editable body of this version.
    #[must_use]
    pub fn document(&self) -> SpecDocument {
        SpecDocument {
            name: self.name.clone(),
            trigger: self.trigger.clone(),
            conditions: self.conditions.clone(),
            actions: self.actions.clone(),
            policy_tags: self.policy_tags.clone(),
        }
    }
}

/// Step-by-step builder for [`AutomationSpec`].
#[derive(Debug, Default)]
pub struct AutomationSpecBuilder {
    id: Option<SpecId>,
    version: Option<u32>,
    name: Option<String>,
    trigger: Option<Trigger>,
    conditions: Vec<Condition>,
    actions: Vec<Action>,
    policy_tags: BTreeSet<String>,
    created_at: Option<Timestamp>,
}

impl AutomationSpecBuilder {
    #[must_use]
    pub fn id(mut self, id: SpecId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.policy_tags.insert(tag.into());
        self
    }

    #[must_use]
    pub fn created_at(mut self, ts: Timestamp) -> Self {
        self.created_at = Some(ts);
        self
    }

    /// Consume the builder, validate, and return an [`AutomationSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::Validation`] if required fields are missing or empty.
    pub fn build(self) -> Result<AutomationSpec, AutoEdgeError> {
        let spec = AutomationSpec {
            id: self.id.unwrap_or_default(),
            version: self.version.unwrap_or(1),
            name: self.name.unwrap_or_default(),
            trigger: self.trigger.unwrap_or(Trigger::Manual),
            conditions: self.conditions,
            actions: self.actions,
            policy_tags: self.policy_tags,
            created_at: self.created_at.unwrap_or_else(crate::time::now),
        };
        spec.validate()?;
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::EntityState;

    fn turn_on(entity: &str) -> Action {
        Action::TurnOn {
            target: TargetRef::entity(entity),
            brightness: None,
        }
    }

    fn valid_spec() -> AutomationSpec {
        AutomationSpec::builder()
            .name("Porch light at dusk")
            .trigger(Trigger::Cron {
                expression: "0 19 * * *".to_string(),
            })
            .action(turn_on("light.porch"))
            .build()
            .unwrap()
    }

    #[test]
    fn should_build_valid_spec_when_required_fields_provided() {
        let spec = valid_spec();
        assert_eq!(spec.name, "Porch light at dusk");
        assert_eq!(spec.version, 1);
        assert!(spec.conditions.is_empty());
        assert_eq!(spec.actions.len(), 1);
    }

    #[test]
    fn should_default_to_manual_trigger_when_not_specified() {
        let spec = AutomationSpec::builder()
            .name("Manual rule")
            .action(turn_on("light.porch"))
            .build()
            .unwrap();
        assert!(matches!(spec.trigger, Trigger::Manual));
    }

    #[test]
    fn should_return_validation_error_when_name_is_empty() {
        let result = AutomationSpec::builder().action(turn_on("light.a")).build();
        assert!(matches!(
            result,
            Err(AutoEdgeError::Validation(ValidationError::EmptyName))
        ));
    }

    #[test]
    fn should_return_validation_error_when_actions_is_empty() {
        let result = AutomationSpec::builder().name("No actions").build();
        assert!(matches!(
            result,
            Err(AutoEdgeError::Validation(ValidationError::NoActions))
        ));
    }

    #[test]
    fn should_collect_all_structural_errors() {
        let spec = AutomationSpec {
            name: String::new(),
            actions: Vec::new(),
            trigger: Trigger::Cron {
                expression: "nope".to_string(),
            },
            ..valid_spec()
        };
        let kinds: Vec<_> = spec.structural_errors().iter().map(ValidationError::kind).collect();
        assert_eq!(kinds, vec!["empty_name", "no_actions", "invalid_trigger"]);
    }

    #[test]
    fn should_list_distinct_referenced_targets_in_order() {
        let spec = AutomationSpec::builder()
            .name("Hall")
            .trigger(Trigger::StateChanged {
                target: TargetRef::entity("binary_sensor.motion"),
                from: None,
                to: Some(EntityState::On),
            })
            .condition(Condition::StateIs {
                target: TargetRef::entity("light.hall"),
                state: EntityState::Off,
            })
            .action(turn_on("light.hall"))
            .action(Action::Delay { seconds: 60 })
            .action(Action::TurnOff {
                target: TargetRef::entity("light.hall"),
            })
            .build()
            .unwrap();
        let targets: Vec<String> = spec
            .referenced_targets()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            targets,
            vec!["entity:binary_sensor.motion", "entity:light.hall"]
        );
    }

    #[test]
    fn should_bind_document_to_id_and_version() {
        let doc = valid_spec().document();
        let id = SpecId::new();
        let spec = AutomationSpec::from_document(id, 3, doc.clone(), crate::time::now()).unwrap();
        assert_eq!(spec.id, id);
        assert_eq!(spec.version, 3);
        assert_eq!(spec.document(), doc);
    }

    #[test]
    fn should_roundtrip_spec_through_serde_json() {
        let spec = AutomationSpec::builder()
            .name("Tagged")
            .tag("allow-critical")
            .action(Action::CallService {
                target: TargetRef::entity("lock.front_door"),
                service: "lock".to_string(),
                data: serde_json::Map::new(),
            })
            .build()
            .unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        let parsed: AutomationSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
        assert!(parsed.has_tag("allow-critical"));
    }
}
