//! Capability graph — an immutable snapshot of what the remote platform can address.
//!
//! Nodes are entities and services. An entity is linked to every service of
//! its domain (`light.kitchen` → `light.turn_on`, `light.toggle`, ...).
//! Snapshots are rebuilt from an [`Inventory`] and never mutated afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::EntityState;
use crate::target::TargetRef;
use crate::time::Timestamp;

/// Expected type of a service parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<i64>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    Boolean,
    Text,
    Choice { options: Vec<String> },
    Any,
}

/// Declared schema of one service parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    #[serde(flatten)]
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
}

impl ParamSchema {
    #[must_use]
    pub fn optional(kind: ParamKind) -> Self {
        Self {
            kind,
            required: false,
        }
    }

    #[must_use]
    pub fn required(kind: ParamKind) -> Self {
        Self {
            kind,
            required: true,
        }
    }

    /// Check a value against the schema.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the value does not fit.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match &self.kind {
            ParamKind::Any => Ok(()),
            ParamKind::Boolean => value
                .is_boolean()
                .then_some(())
                .ok_or_else(|| format!("expected a boolean, got {value}")),
            ParamKind::Text => value
                .is_string()
                .then_some(())
                .ok_or_else(|| format!("expected a string, got {value}")),
            ParamKind::Choice { options } => match value.as_str() {
                Some(choice) if options.iter().any(|o| o == choice) => Ok(()),
                _ => Err(format!("expected one of {options:?}, got {value}")),
            },
            ParamKind::Integer { min, max } => {
                let n = value
                    .as_i64()
                    .ok_or_else(|| format!("expected an integer, got {value}"))?;
                check_bounds(n, *min, *max)
            }
            ParamKind::Number { min, max } => {
                let n = value
                    .as_f64()
                    .ok_or_else(|| format!("expected a number, got {value}"))?;
                check_bounds(n, *min, *max)
            }
        }
    }
}

fn check_bounds<T>(value: T, min: Option<T>, max: Option<T>) -> Result<(), String>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if let Some(min) = min
        && value < min
    {
        return Err(format!("{value} is below the minimum {min}"));
    }
    if let Some(max) = max
        && value > max
    {
        return Err(format!("{value} is above the maximum {max}"));
    }
    Ok(())
}

/// An entity as reported by the remote platform inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    pub entity_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub state: EntityState,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// A service as reported by the remote platform inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteService {
    pub domain: String,
    pub service: String,
    #[serde(default)]
    pub fields: BTreeMap<String, ParamSchema>,
}

/// Raw inventory fetched from the remote platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    pub entities: Vec<RemoteEntity>,
    pub services: Vec<RemoteService>,
}

/// Entity node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    pub entity_id: String,
    pub domain: String,
    pub name: String,
    pub state: EntityState,
    pub available: bool,
    pub attributes: Map<String, Value>,
}

/// Service node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub domain: String,
    pub service: String,
    pub fields: BTreeMap<String, ParamSchema>,
}

impl ServiceNode {
    /// `domain.service`, the key of the node in the graph.
    #[must_use]
    pub fn key(&self) -> String {
        service_key(&self.domain, &self.service)
    }
}

/// Result of a [`CapabilityGraph::lookup`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node<'a> {
    Entity(&'a EntityNode),
    Service(&'a ServiceNode),
}

impl Node<'_> {
    #[must_use]
    pub fn domain(&self) -> &str {
        match self {
            Self::Entity(entity) => &entity.domain,
            Self::Service(service) => &service.domain,
        }
    }
}

/// Owned copy of a [`Node`], handed out across snapshot boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDescriptor {
    Entity(EntityNode),
    Service(ServiceNode),
}

impl From<Node<'_>> for NodeDescriptor {
    fn from(node: Node<'_>) -> Self {
        match node {
            Node::Entity(entity) => Self::Entity(entity.clone()),
            Node::Service(service) => Self::Service(service.clone()),
        }
    }
}

/// An immutable inventory snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityGraph {
    /// Monotonic snapshot number; `0` means nothing was ever built.
    pub version: u64,
    pub built_at: Option<Timestamp>,
    /// Set when the last refresh failed and this is the previous good snapshot.
    pub stale: bool,
    pub entities: BTreeMap<String, EntityNode>,
    /// Keyed by `domain.service`.
    pub services: BTreeMap<String, ServiceNode>,
}

impl CapabilityGraph {
    /// The placeholder served before the first successful refresh.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            version: 0,
            built_at: None,
            stale: true,
            entities: BTreeMap::new(),
            services: BTreeMap::new(),
        }
    }

    /// Build a fresh snapshot from a complete inventory.
    #[must_use]
    pub fn from_inventory(version: u64, built_at: Timestamp, inventory: Inventory) -> Self {
        let entities = inventory
            .entities
            .into_iter()
            .map(|remote| {
                let domain = entity_domain(&remote.entity_id).to_string();
                let name = remote
                    .name
                    .or_else(|| {
                        remote
                            .attributes
                            .get("friendly_name")
                            .and_then(Value::as_str)
                            .map(String::from)
                    })
                    .unwrap_or_else(|| remote.entity_id.clone());
                let node = EntityNode {
                    available: remote.state.is_available(),
                    entity_id: remote.entity_id.clone(),
                    domain,
                    name,
                    state: remote.state,
                    attributes: remote.attributes,
                };
                (remote.entity_id, node)
            })
            .collect();
        let services = inventory
            .services
            .into_iter()
            .map(|remote| {
                let node = ServiceNode {
                    domain: remote.domain,
                    service: remote.service,
                    fields: remote.fields,
                };
                (node.key(), node)
            })
            .collect();
        Self {
            version,
            built_at: Some(built_at),
            stale: false,
            entities,
            services,
        }
    }

    /// Copy of this snapshot flagged as stale.
    #[must_use]
    pub fn as_stale(&self) -> Self {
        Self {
            stale: true,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn entity(&self, entity_id: &str) -> Option<&EntityNode> {
        self.entities.get(entity_id)
    }

    #[must_use]
    pub fn service(&self, domain: &str, service: &str) -> Option<&ServiceNode> {
        self.services.get(&service_key(domain, service))
    }

    /// Services reachable from an entity (every service of its domain).
    pub fn services_for<'a>(&'a self, entity: &'a EntityNode) -> impl Iterator<Item = &'a ServiceNode> + 'a {
        self.services
            .values()
            .filter(move |service| service.domain == entity.domain)
    }

    /// Resolve a target reference to a node.
    #[must_use]
    pub fn lookup(&self, target: &TargetRef) -> Option<Node<'_>> {
        match target {
            TargetRef::Entity(entity_id) => self.entity(entity_id).map(Node::Entity),
            TargetRef::Service { domain, service } => {
                self.service(domain, service).map(Node::Service)
            }
        }
    }

    /// Resolve the service an action calls on a target, following the
    /// entity → domain service edge.
    #[must_use]
    pub fn resolve_service(&self, target: &TargetRef, service: &str) -> Option<&ServiceNode> {
        match self.lookup(target)? {
            Node::Entity(entity) => self.service(&entity.domain, service),
            Node::Service(node) => (node.service == service).then_some(node),
        }
    }
}

/// Domain part of an entity id (`light` for `light.kitchen`).
#[must_use]
pub fn entity_domain(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map_or(entity_id, |(domain, _)| domain)
}

fn service_key(domain: &str, service: &str) -> String {
    format!("{domain}.{service}")
}
