//! Trigger router — matches inbound state changes against deployed specs.
//!
//! For each deployed spec the version routed for the event is loaded and its
//! `state_changed` trigger is checked. Every match submits a queued
//! execution whose trigger identity is the event id, so a replayed event
//! never applies twice.

use std::sync::Arc;

use serde::Serialize;

use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::id::{SpecId, TaskId};
use autoedge_domain::spec::StateChange;

use crate::execution::{ExecuteRequest, ExecutionMode, ExecutionService, Submission};
use crate::ports::{Clock, RemotePlatform, Storage};

/// One spec triggered by an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Routed {
    pub spec_id: SpecId,
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub replayed: bool,
    /// Why the execution was not accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct TriggerRouter<S, R, C> {
    store: Arc<S>,
    execution: Arc<ExecutionService<S, R, C>>,
}

impl<S, R, C> TriggerRouter<S, R, C>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    pub fn new(store: Arc<S>, execution: Arc<ExecutionService<S, R, C>>) -> Self {
        Self { store, execution }
    }

    /// Submit an execution for every spec whose trigger matches `event`.
    ///
    /// A refused execution is reported in its [`Routed`] entry and does not
    /// stop the others.
    ///
    /// # Errors
    ///
    /// Returns storage errors only.
    #[tracing::instrument(skip(self, event), fields(event_id = %event.event_id, entity_id = %event.entity_id))]
    pub async fn route(&self, event: &StateChange) -> Result<Vec<Routed>, AutoEdgeError> {
        let identity = event.trigger_identity();
        let mut routed = Vec::new();
        for rollout in self.store.list_rollouts().await? {
            let Some(version) = rollout.route(&identity) else {
                continue;
            };
            let Some(spec) = self
                .store
                .get_spec_version(rollout.spec_id, version)
                .await?
            else {
                continue;
            };
            if !spec.trigger.matches_event(event) {
                continue;
            }
            let request = ExecuteRequest {
                mode: ExecutionMode::Queued,
                trigger_identity: Some(identity.clone()),
                ..ExecuteRequest::default()
            };
            let entry = match self.execution.submit(spec.id, request).await {
                Ok(submission) => Routed {
                    spec_id: spec.id,
                    version,
                    task_id: Some(submission.task().id),
                    replayed: matches!(submission, Submission::Replayed(_)),
                    error: None,
                },
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    tracing::warn!(spec_id = %spec.id, error = %err, "triggered execution refused");
                    Routed {
                        spec_id: spec.id,
                        version,
                        task_id: None,
                        replayed: false,
                        error: Some(err.to_string()),
                    }
                }
            };
            routed.push(entry);
        }
        tracing::debug!(matched = routed.len(), "state change routed");
        Ok(routed)
    }
}
