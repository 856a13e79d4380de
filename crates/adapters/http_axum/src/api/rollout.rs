//! Per-spec rollout: canary, promotion, rollback, pause.

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;

use autoedge_app::ports::{Clock, RemotePlatform, Storage};
use autoedge_domain::rollout::RolloutState;

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CanaryBody {
    pub percentage: u8,
}

/// `GET /api/specs/{id}/rollout`
pub async fn get<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
) -> Result<Json<RolloutState>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.rollouts.get(parse_id("spec id", &id)?).await?))
}

/// `POST /api/specs/{id}/rollout/canary` — route a share of triggers to
/// the latest version.
pub async fn canary<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
    Json(body): Json<CanaryBody>,
) -> Result<Json<RolloutState>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let rollout = state
        .agent
        .rollouts
        .set_canary(parse_id("spec id", &id)?, body.percentage)
        .await?;
    Ok(Json(rollout))
}

/// `POST /api/specs/{id}/rollout/promote`
pub async fn promote<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
) -> Result<Json<RolloutState>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.rollouts.promote(parse_id("spec id", &id)?).await?))
}

/// `POST /api/specs/{id}/rollout/rollback`
pub async fn rollback<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
) -> Result<Json<RolloutState>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.rollouts.rollback(parse_id("spec id", &id)?).await?))
}

/// `POST /api/specs/{id}/rollout/pause`
pub async fn pause<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
) -> Result<Json<RolloutState>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.rollouts.pause_spec(parse_id("spec id", &id)?).await?))
}

/// `POST /api/specs/{id}/rollout/resume`
pub async fn resume<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
) -> Result<Json<RolloutState>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.rollouts.resume_spec(parse_id("spec id", &id)?).await?))
}
