//! Trigger ingestion and the Server-Sent Events stream.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Serialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use autoedge_app::ports::{Clock, RemotePlatform, Storage};
use autoedge_app::router::Routed;
use autoedge_domain::spec::StateChange;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct IngestBody {
    pub event_id: String,
    pub routed: Vec<Routed>,
}

/// `POST /api/events` — feed a platform state change to the trigger router.
pub async fn ingest<S, R, C>(
    State(state): State<AppState<S, R, C>>,
    Json(event): Json<StateChange>,
) -> Result<(StatusCode, Json<IngestBody>), ApiError>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let routed = state.agent.router.route(&event).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestBody {
            event_id: event.event_id,
            routed,
        }),
    ))
}

/// `GET /api/events/stream` — SSE stream of engine events.
///
/// Each event is sent as a JSON `data:` frame with the event id as SSE
/// `id:`. A lagging subscriber skips the events it missed.
pub async fn stream<S, R, C>(
    State(state): State<AppState<S, R, C>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, std::convert::Infallible>>>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    let events = BroadcastStream::new(state.agent.events.subscribe()).filter_map(|result| {
        match result {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().id(event.id.to_string()).data(json))),
                Err(err) => {
                    tracing::warn!(%err, "failed to serialize event for SSE stream");
                    None
                }
            },
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "SSE subscriber lagged, some events were dropped");
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}
