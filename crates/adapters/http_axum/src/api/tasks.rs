//! Task inspection and cancellation.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Serialize;

use autoedge_app::execution::CancelOutcome;
use autoedge_app::ports::{Clock, RemotePlatform, Storage};
use autoedge_domain::id::TaskId;
use autoedge_domain::task::{Task, TaskFilter};

use crate::error::{ApiError, parse_id};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CancelBody {
    pub task_id: TaskId,
    pub outcome: CancelOutcome,
}

/// `GET /api/tasks?status=&spec_id=&limit=` — newest first.
pub async fn list<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Vec<Task>>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Ok(Json(state.agent.execution.list_tasks(&filter).await?))
}

/// `GET /api/tasks/{id}`
pub async fn get<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
) -> Result<Json<Task>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let task = state.agent.execution.get_task(parse_id("task id", &id)?).await?;
    Ok(Json(task))
}

/// `POST /api/tasks/{id}/cancel`
pub async fn cancel<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Path(id): Path<String>,
) -> Result<Json<CancelBody>, ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let task_id = parse_id("task id", &id)?;
    let outcome = state.agent.execution.cancel_task(task_id).await?;
    Ok(Json(CancelBody { task_id, outcome }))
}
