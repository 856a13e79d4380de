//! JSON control API, nested under `/api`.

#[allow(clippy::missing_errors_doc)]
pub mod control;
#[allow(clippy::missing_errors_doc)]
pub mod events;
#[allow(clippy::missing_errors_doc)]
pub mod rollout;
#[allow(clippy::missing_errors_doc)]
pub mod schedules;
#[allow(clippy::missing_errors_doc)]
pub mod specs;
#[allow(clippy::missing_errors_doc)]
pub mod tasks;

use axum::Router;
use axum::routing::{get, post};

use autoedge_app::ports::{Clock, RemotePlatform, Storage};

use crate::state::AppState;

/// Build the `/api` sub-router.
pub fn routes<S, R, C>() -> Router<AppState<S, R, C>>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    Router::new()
        // Specs
        .route(
            "/specs",
            get(specs::list::<S, R, C>).post(specs::create::<S, R, C>),
        )
        .route(
            "/specs/{id}",
            get(specs::get::<S, R, C>).put(specs::update::<S, R, C>),
        )
        .route("/specs/{id}/versions", get(specs::versions::<S, R, C>))
        .route("/specs/{id}/deploy", post(specs::deploy::<S, R, C>))
        .route("/specs/{id}/validate", post(specs::validate::<S, R, C>))
        .route("/specs/{id}/execute", post(specs::execute::<S, R, C>))
        // Rollout
        .route("/specs/{id}/rollout", get(rollout::get::<S, R, C>))
        .route("/specs/{id}/rollout/canary", post(rollout::canary::<S, R, C>))
        .route("/specs/{id}/rollout/promote", post(rollout::promote::<S, R, C>))
        .route("/specs/{id}/rollout/rollback", post(rollout::rollback::<S, R, C>))
        .route("/specs/{id}/rollout/pause", post(rollout::pause::<S, R, C>))
        .route("/specs/{id}/rollout/resume", post(rollout::resume::<S, R, C>))
        // Tasks
        .route("/tasks", get(tasks::list::<S, R, C>))
        .route("/tasks/{id}", get(tasks::get::<S, R, C>))
        .route("/tasks/{id}/cancel", post(tasks::cancel::<S, R, C>))
        // Schedules
        .route("/schedules", get(schedules::list::<S, R, C>))
        .route("/schedules/{spec_id}/enable", post(schedules::enable::<S, R, C>))
        .route("/schedules/{spec_id}/disable", post(schedules::disable::<S, R, C>))
        .route("/schedules/{spec_id}/next-run", get(schedules::next_run::<S, R, C>))
        // Control & observability
        .route("/explain/{correlation_id}", get(control::explain::<S, R, C>))
        .route("/control/kill-switch", get(control::kill_switch::<S, R, C>))
        .route("/control/pause", post(control::pause::<S, R, C>))
        .route("/control/resume", post(control::resume::<S, R, C>))
        .route("/capabilities", get(control::capabilities::<S, R, C>))
        .route(
            "/capabilities/refresh",
            post(control::refresh_capabilities::<S, R, C>),
        )
        // Events
        .route("/events", post(events::ingest::<S, R, C>))
        .route("/events/stream", get(events::stream::<S, R, C>))
}
