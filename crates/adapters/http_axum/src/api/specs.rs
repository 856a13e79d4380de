//! Spec registry and execution endpoints.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use autoedge_app::execution::{ExecuteRequest, ExecutionMode, Submission};
use autoedge_app::ports::{Clock, RemotePlatform, Storage};
use autoedge_domain::id::SpecId;
use autoedge_domain::plan::ExecutionPlan;
use autoedge_domain::rollout::RolloutState;
use autoedge_domain::spec::{AutomationSpec, SpecDocument};
use autoedge_domain::task::{Priority, Task};
use autoedge_domain::time::Timestamp;

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

/// Selects a version; the latest one when absent.
#[derive(Debug, Default, Deserialize)]
pub struct VersionQuery {
    pub version: Option<u32>,
}

/// Request body of `POST /api/specs/{id}/execute`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ExecuteBody {
    pub mode: ExecutionMode,
    pub idempotency_key: Option<String>,
    pub trigger_identity: Option<String>,
    pub delay_secs: Option<u64>,
    pub eta: Option<Timestamp>,
    pub priority: Option<u8>,
    pub dry_run: bool,
}

impl From<ExecuteBody> for ExecuteRequest {
    fn from(body: ExecuteBody) -> Self {
        Self {
            mode: body.mode,
            idempotency_key: body.idempotency_key,
            trigger_identity: body.trigger_identity,
            delay: body.delay_secs.map(Duration::from_secs),
            eta: body.eta,
            priority: body.priority.map(Priority),
            dry_run: body.dry_run,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionKind {
    Completed,
    Queued,
    Replayed,
}

#[derive(Debug, Serialize)]
pub struct SubmissionBody {
    pub submission: SubmissionKind,
    pub task: Task,
}

/// Possible responses from the spec read endpoints.
pub enum SpecResponse {
    Ok(Json<AutomationSpec>),
    Created(Json<AutomationSpec>),
}

impl IntoResponse for SpecResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
            Self::Created(json) => (StatusCode::CREATED, json).into_response(),
        }
    }
}

/// Possible responses from the execute endpoint.
pub enum ExecuteResponse {
    /// Ran to completion, or replayed an earlier task.
    Ok(Json<SubmissionBody>),
    Accepted(Json<SubmissionBody>),
}

impl IntoResponse for ExecuteResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Ok(json) => json.into_response(),
            Self::Accepted(json) => (StatusCode::ACCEPTED, json).into_response(),
        }
    }
}

impl From<Submission> for ExecuteResponse {
    fn from(submission: Submission) -> Self {
        match submission {
            Submission::Completed(task) => Self::Ok(Json(SubmissionBody {
                submission: SubmissionKind::Completed,
                task,
            })),
            Submission::Replayed(task) => Self::Ok(Json(SubmissionBody {
                submission: SubmissionKind::Replayed,
                task,
            })),
            Submission::Queued(task) => Self::Accepted(Json(SubmissionBody {
                submission: SubmissionKind::Queued,
                task,
            })),
        }
    }
}

/// `GET /api/specs` — the active version of every deployed spec.
pub async fn list<S, R, C>(
    State(state): State<AppState<S, R, C>>,
) -> Result<Json<Vec<AutomationSpec>>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.specs.list_active().await?))
}

/// `POST /api/specs` — register version 1 of a new spec.
pub async fn create<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Json(document): Json<SpecDocument>,
) -> Result<SpecResponse, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let spec = state.agent.specs.create(document).await?;
    Ok(SpecResponse::Created(Json(spec)))
}

/// `GET /api/specs/{id}` — the deployed version, or the latest when undeployed.
pub async fn get<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
) -> Result<SpecResponse, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let spec = state.agent.specs.get(parse_id("spec id", &id)?).await?;
    Ok(SpecResponse::Ok(Json(spec)))
}

/// `PUT /api/specs/{id}` — append a new version.
pub async fn update<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
    Json(document): Json<SpecDocument>,
) -> Result<SpecResponse, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let spec = state
        .agent
        .specs
        .update(parse_id("spec id", &id)?, document)
        .await?;
    Ok(SpecResponse::Created(Json(spec)))
}

/// `GET /api/specs/{id}/versions` — every version, oldest first.
pub async fn versions<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AutomationSpec>>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let history = state.agent.specs.history(parse_id("spec id", &id)?).await?;
    Ok(Json(history))
}

/// `POST /api/specs/{id}/deploy[?version=N]` — make a version active.
pub async fn deploy<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<RolloutState>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let spec_id: SpecId = parse_id("spec id", &id)?;
    let version = match query.version {
        Some(version) => version,
        None => latest_version(&state, spec_id).await?,
    };
    Ok(Json(state.agent.rollouts.deploy(spec_id, version).await?))
}

/// `POST /api/specs/{id}/validate[?version=N]` — plan without running.
pub async fn validate<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
    Query(query): Query<VersionQuery>,
) -> Result<Json<ExecutionPlan>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let plan = state
        .agent
        .specs
        .validate(parse_id("spec id", &id)?, query.version)
        .await?;
    Ok(Json(plan))
}

/// `POST /api/specs/{id}/execute` — request an execution.
pub async fn execute<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> Result<ExecuteResponse, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let submission = state
        .agent
        .execution
        .submit(parse_id("spec id", &id)?, body.into())
        .await?;
    Ok(submission.into())
}

async fn latest_version<S, R, C>(state: &AppState<S, R, C>, spec_id: SpecId) -> Result<u32, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let history = state.agent.specs.history(spec_id).await?;
    history
        .last()
        .map(|spec| spec.version)
        .ok_or_else(|| ApiError::BadRequest(format!("spec {spec_id} has no version")))
}
