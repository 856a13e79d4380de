//! Kill switch, explainability and the capability graph.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use autoedge_app::ports::{Clock, RemotePlatform, Storage};
use autoedge_domain::capability::CapabilityGraph;
use autoedge_domain::id::TaskId;
use autoedge_domain::record::ExecutionRecord;
use autoedge_domain::rollout::KillSwitch;

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PauseBody {
    #[serde(flatten)]
    pub kill_switch: KillSwitch,
    /// Waiting tasks cancelled by the pause.
    pub cancelled: Vec<TaskId>,
}

/// `GET /api/explain/{correlation_id}` — the decision trace of a request.
pub async fn explain<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<ExecutionRecord>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let record = state
        .agent
        .execution
        .explain(parse_id("correlation id", &correlation_id)?)
        .await?;
    Ok(Json(record))
}

/// `GET /api/control/kill-switch`
pub async fn kill_switch<S, R, C>(
    State(state): State<AppState<S, R, C>>,
) -> Result<Json<KillSwitch>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.rollouts.kill_switch().await?))
}

/// `POST /api/control/pause` — engage the kill switch.
pub async fn pause<S, R, C>(
    State(state): State<AppState<S, R, C>>,
) -> Result<Json<PauseBody>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let cancelled = state.agent.rollouts.pause().await?;
    let kill_switch = state.agent.rollouts.kill_switch().await?;
    Ok(Json(PauseBody {
        kill_switch,
        cancelled,
    }))
}

/// `POST /api/control/resume` — release the kill switch.
pub async fn resume<S, R, C>(
    State(state): State<AppState<S, R, C>>,
) -> Result<Json<KillSwitch>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.rollouts.resume().await?))
}

/// `GET /api/capabilities` — the current snapshot.
pub async fn capabilities<S, R, C>(State(state): State<AppState<S, R, C>>) -> Json<CapabilityGraph>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Json(CapabilityGraph::clone(&state.agent.graph.snapshot()))
}

/// `POST /api/capabilities/refresh` — rebuild from the remote inventory.
pub async fn refresh_capabilities<S, R, C>(
    State(state): State<AppState<S, R, C>>,
) -> Json<CapabilityGraph>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Json(CapabilityGraph::clone(&*state.agent.refresh_capabilities().await))
}
