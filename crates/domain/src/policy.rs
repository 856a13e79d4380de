//! Policy gates applied by the planner after target and parameter checks.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::spec::AutomationSpec;

/// Allow/deny rules on spec tags and security-critical domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Domains whose actions require [`override_tag`](Self::override_tag).
    pub critical_domains: BTreeSet<String>,
    /// Tag that authorises actions on critical domains.
    pub override_tag: String,
    /// Tags that reject a spec outright.
    pub denied_tags: BTreeSet<String>,
    /// When non-empty, every tag of a spec must be listed here.
    pub allowed_tags: BTreeSet<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            critical_domains: ["lock", "alarm_control_panel"]
                .into_iter()
                .map(String::from)
                .collect(),
            override_tag: "allow-critical".to_string(),
            denied_tags: BTreeSet::new(),
            allowed_tags: BTreeSet::new(),
        }
    }
}

impl PolicyConfig {
    #[must_use]
    pub fn is_critical(&self, domain: &str) -> bool {
        self.critical_domains.contains(domain)
    }

    /// Every policy violation of the spec.
    ///
    /// `action_domains` lists, for each action with a target, the target
    /// reference and the domain it resolved to.
    #[must_use]
    pub fn violations<'a>(
        &self,
        spec: &AutomationSpec,
        action_domains: impl IntoIterator<Item = (String, &'a str)>,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let overridden = spec.has_tag(&self.override_tag);
        let mut reported = BTreeSet::new();
        for (reference, domain) in action_domains {
            if self.is_critical(domain) && !overridden && reported.insert(reference.clone()) {
                errors.push(ValidationError::PolicyViolation {
                    reference,
                    rule: format!(
                        "domain {domain} is security-critical and requires tag {}",
                        self.override_tag
                    ),
                });
            }
        }
        for tag in &spec.policy_tags {
            if self.denied_tags.contains(tag) {
                errors.push(ValidationError::PolicyViolation {
                    reference: format!("tag:{tag}"),
                    rule: "tag is denied".to_string(),
                });
            } else if !self.allowed_tags.is_empty() && !self.allowed_tags.contains(tag) {
                errors.push(ValidationError::PolicyViolation {
                    reference: format!("tag:{tag}"),
                    rule: "tag is not in the allow list".to_string(),
                });
            }
        }
        errors
    }
}
