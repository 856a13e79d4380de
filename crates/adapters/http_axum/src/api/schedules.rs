//! Cron schedule management.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use autoedge_app::ports::{Clock, RemotePlatform, Storage};
use autoedge_domain::id::SpecId;
use autoedge_domain::schedule::Schedule;
use autoedge_domain::time::Timestamp;

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct NextRunBody {
    pub spec_id: SpecId,
    pub next_run: Option<Timestamp>,
}

/// `GET /api/schedules`
pub async fn list<S, R, C>(
    State(state): State<AppState<S, R, C>>,
) -> Result<Json<Vec<Schedule>>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.scheduler.list().await?))
}

/// `POST /api/schedules/{spec_id}/enable`
pub async fn enable<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(spec_id): Path<String>,
) -> Result<Json<Schedule>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let schedule = state
        .agent
        .scheduler
        .enable(parse_id("spec id", &spec_id)?)
        .await?;
    Ok(Json(schedule))
}

/// `POST /api/schedules/{spec_id}/disable`
pub async fn disable<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(spec_id): Path<String>,
) -> Result<Json<Schedule>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let schedule = state
        .agent
        .scheduler
        .disable(parse_id("spec id", &spec_id)?)
        .await?;
    Ok(Json(schedule))
}

/// `GET /api/schedules/{spec_id}/next-run`
pub async fn next_run<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(spec_id): Path<String>,
) -> Result<Json<NextRunBody>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let spec_id = parse_id("spec id", &spec_id)?;
    let next_run = state.agent.scheduler.next_run(spec_id).await?;
    Ok(Json(NextRunBody { spec_id, next_run }))
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::testing::TestApp;

    #[tokio::test]
    async fn should_schedule_deployed_cron_spec() {
        let app = TestApp::new().await;
        let id = app
            .deployed_spec(json!({
                "name": "Morning coffee",
                "trigger": {"type": "cron", "expression": "0 7 * * *"},
                "actions": [{"type": "turn_on", "target": "entity:switch.coffee_maker"}]
            }))
            .await;

        let (_, schedules) = app.send(Method::GET, "/api/schedules", None).await;
        let (_, next) = app
            .send(Method::GET, &format!("/api/schedules/{id}/next-run"), None)
            .await;
        let (status, disabled) = app
            .send(Method::POST, &format!("/api/schedules/{id}/disable"), None)
            .await;

        assert_eq!(schedules.as_array().unwrap().len(), 1);
        assert!(next["next_run"].is_string());
        assert_eq!(status, StatusCode::OK);
        assert_eq!(disabled["enabled"], false);
    }
}
