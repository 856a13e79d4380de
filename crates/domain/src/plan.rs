//! Execution plan — the immutable binding of one spec version to graph nodes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::SpecId;
use crate::spec::Condition;
use crate::target::TargetRef;

/// A concrete remote service call with resolved parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCall {
    pub target: TargetRef,
    pub domain: String,
    pub service: String,
    /// Set when the target is an entity; sent as the call's `entity_id`.
    pub entity_id: Option<String>,
    pub data: Map<String, Value>,
}

impl std::fmt::Display for ResolvedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}({})", self.domain, self.service, self.target)
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum PlanStep {
    Invoke(ResolvedCall),
    Wait { seconds: u64 },
}

/// Validated plan for a spec version, produced only by [`crate::planner::plan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    spec_id: SpecId,
    spec_version: u32,
    graph_version: u64,
    conditions: Vec<Condition>,
    steps: Vec<PlanStep>,
}

impl ExecutionPlan {
    pub(crate) fn new(
        spec_id: SpecId,
        spec_version: u32,
        graph_version: u64,
        conditions: Vec<Condition>,
        steps: Vec<PlanStep>,
    ) -> Self {
        Self {
            spec_id,
            spec_version,
            graph_version,
            conditions,
            steps,
        }
    }

    #[must_use]
    pub fn spec_id(&self) -> SpecId {
        self.spec_id
    }

    #[must_use]
    pub fn spec_version(&self) -> u32 {
        self.spec_version
    }

    /// Version of the capability graph snapshot the plan was bound against.
    #[must_use]
    pub fn graph_version(&self) -> u64 {
        self.graph_version
    }

    #[must_use]
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    #[must_use]
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// Remote calls of the plan with their step index.
    pub fn invocations(&self) -> impl Iterator<Item = (usize, &ResolvedCall)> {
        self.steps
            .iter()
            .enumerate()
            .filter_map(|(index, step)| match step {
                PlanStep::Invoke(call) => Some((index, call)),
                PlanStep::Wait { .. } => None,
            })
    }

    /// Distinct targets touched by the plan's remote calls.
    #[must_use]
    pub fn targets(&self) -> Vec<TargetRef> {
        let mut seen = BTreeSet::new();
        self.invocations()
            .filter(|(_, call)| seen.insert(&call.target))
            .map(|(_, call)| call.target.clone())
            .collect()
    }
}
