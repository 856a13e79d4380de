//! Target references — how a spec addresses something on the remote platform.
//!
//! A reference is written `entity:<entity_id>` or `service:<domain>.<service>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// An addressable node of the [`CapabilityGraph`](crate::capability::CapabilityGraph).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TargetRef {
    /// A single entity, e.g. `entity:light.kitchen`.
    Entity(String),
    /// A domain-level service, e.g. `service:scene.turn_on`.
    Service { domain: String, service: String },
}

impl TargetRef {
    #[must_use]
    pub fn entity(entity_id: impl Into<String>) -> Self {
        Self::Entity(entity_id.into())
    }

    #[must_use]
    pub fn service(domain: impl Into<String>, service: impl Into<String>) -> Self {
        Self::Service {
            domain: domain.into(),
            service: service.into(),
        }
    }

    /// The entity id, when this reference addresses an entity.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Self::Entity(id) => Some(id),
            Self::Service { .. } => None,
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity(id) => write!(f, "entity:{id}"),
            Self::Service { domain, service } => write!(f, "service:{domain}.{service}"),
        }
    }
}

impl FromStr for TargetRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidTargetRef {
            reference: s.to_string(),
        };
        let (scheme, rest) = s.split_once(':').ok_or_else(invalid)?;
        if rest.is_empty() {
            return Err(invalid());
        }
        match scheme {
            "entity" => Ok(Self::Entity(rest.to_string())),
            "service" => {
                let (domain, service) = rest.split_once('.').ok_or_else(invalid)?;
                if domain.is_empty() || service.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::service(domain, service))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for TargetRef {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetRef> for String {
    fn from(value: TargetRef) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_entity_reference() {
        let target: TargetRef = "entity:kitchen_light".parse().unwrap();
        assert_eq!(target, TargetRef::entity("kitchen_light"));
        assert_eq!(target.entity_id(), Some("kitchen_light"));
    }

    #[test]
    fn should_parse_service_reference() {
        let target: TargetRef = "service:scene.turn_on".parse().unwrap();
        assert_eq!(target, TargetRef::service("scene", "turn_on"));
        assert_eq!(target.entity_id(), None);
    }

    #[test]
    fn should_reject_unknown_scheme() {
        let result = "device:abc".parse::<TargetRef>();
        assert!(matches!(
            result,
            Err(ValidationError::InvalidTargetRef { reference }) if reference == "device:abc"
        ));
    }

    #[test]
    fn should_reject_service_without_domain() {
        assert!("service:turn_on".parse::<TargetRef>().is_err());
        assert!("service:.turn_on".parse::<TargetRef>().is_err());
        assert!("entity:".parse::<TargetRef>().is_err());
    }

    #[test]
    fn should_serialize_as_plain_string() {
        let target = TargetRef::entity("light.kitchen");
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, "\"entity:light.kitchen\"");
        let parsed: TargetRef = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, target);
    }
}
