//! Axum router assembly.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use autoedge_app::health::{HealthReport, HealthStatus};
use autoedge_app::ports::{Clock, RemotePlatform, Storage};

use crate::error::ApiError;
use crate::state::AppState;

/// Build the top-level axum [`Router`].
///
/// Serves `/health` and nests the JSON API under `/api`. Includes a
/// [`TraceLayer`] that logs each HTTP request/response at the `DEBUG` level.
pub fn build<S, R, C>(state: AppState<S, R, C>) -> Router
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Router::new()
        .route("/health", get(health::<S, R, C>))
        .nest("/api", crate::api::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /health` — `200` while every worker runs, `503` once one halted.
async fn health<S, R, C>(
    State(state): State<AppState<S, R, C>>,
) -> Result<(StatusCode, Json<HealthReport>), ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let report = state.agent.health_report().await?;
    let status = match report.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    Ok((status, Json(report)))
}
