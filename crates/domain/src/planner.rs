//! Validator & planner — turn a spec version into an [`ExecutionPlan`] or a
//! complete list of [`ValidationError`]s.
//!
//! Pure and deterministic given a graph snapshot, a spec and a policy. Checks
//! run in order and never short-circuit:
//!
//! 1. structural checks (name, actions, cron, time ranges)
//! 2. target resolution: one `TargetUnavailable` per distinct unknown target
//! 3. service and parameter compatibility, for resolved targets only
//! 4. policy gates

use std::collections::BTreeSet;

use crate::capability::CapabilityGraph;
use crate::error::ValidationError;
use crate::plan::{ExecutionPlan, PlanStep, ResolvedCall};
use crate::policy::PolicyConfig;
use crate::spec::{Action, AutomationSpec};
use crate::target::TargetRef;

/// Validate `spec` against `graph` and `policy` and bind it into a plan.
///
/// # Errors
///
/// Returns every failed check when at least one fails; no plan is built then.
pub fn plan(
    spec: &AutomationSpec,
    graph: &CapabilityGraph,
    policy: &PolicyConfig,
) -> Result<ExecutionPlan, Vec<ValidationError>> {
    let mut errors = spec.structural_errors();

    let mut unresolved = BTreeSet::new();
    for target in spec.referenced_targets() {
        if graph.lookup(target).is_none() {
            unresolved.insert(target);
            errors.push(ValidationError::TargetUnavailable {
                reference: target.to_string(),
            });
        }
    }

    let mut steps = Vec::with_capacity(spec.actions.len());
    let mut action_domains = Vec::new();
    for action in &spec.actions {
        let (Some(target), Some(service)) = (action.target(), action.service_name()) else {
            if let Action::Delay { seconds } = action {
                steps.push(PlanStep::Wait { seconds: *seconds });
            }
            continue;
        };
        if unresolved.contains(target) {
            continue;
        }
        match bind_call(graph, target, service, action) {
            Ok(call) => {
                action_domains.push((target.to_string(), call.domain.clone()));
                steps.push(PlanStep::Invoke(call));
            }
            Err(mut call_errors) => errors.append(&mut call_errors),
        }
    }

    errors.extend(policy.violations(
        spec,
        action_domains
            .iter()
            .map(|(reference, domain)| (reference.clone(), domain.as_str())),
    ));

    if errors.is_empty() {
        Ok(ExecutionPlan::new(
            spec.id,
            spec.version,
            graph.version,
            spec.conditions.clone(),
            steps,
        ))
    } else {
        Err(errors)
    }
}

fn bind_call(
    graph: &CapabilityGraph,
    target: &TargetRef,
    service: &str,
    action: &Action,
) -> Result<ResolvedCall, Vec<ValidationError>> {
    let reference = target.to_string();
    let Some(node) = graph.resolve_service(target, service) else {
        return Err(vec![ValidationError::UnknownService {
            reference,
            service: service.to_string(),
        }]);
    };

    let data = action.parameters();
    let mut errors = Vec::new();
    for (name, value) in &data {
        match node.fields.get(name) {
            Some(schema) => {
                if let Err(reason) = schema.check(value) {
                    errors.push(ValidationError::IncompatibleParameter {
                        reference: reference.clone(),
                        parameter: name.clone(),
                        reason,
                    });
                }
            }
            None => errors.push(ValidationError::IncompatibleParameter {
                reference: reference.clone(),
                parameter: name.clone(),
                reason: format!("not accepted by {}", node.key()),
            }),
        }
    }
    for (name, schema) in &node.fields {
        let implicit = name == "entity_id" && target.entity_id().is_some();
        if schema.required && !implicit && !data.contains_key(name) {
            errors.push(ValidationError::MissingParameter {
                reference: reference.clone(),
                parameter: name.clone(),
            });
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let domain = match graph.lookup(target) {
        Some(resolved) => resolved.domain().to_string(),
        None => node.domain.clone(),
    };
    Ok(ResolvedCall {
        target: target.clone(),
        domain,
        service: node.service.clone(),
        entity_id: target.entity_id().map(String::from),
        data,
    })
}
