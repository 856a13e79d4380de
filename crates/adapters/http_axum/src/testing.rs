//! In-process harness: the real router over in-memory `SQLite` and the
//! virtual platform.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use axum::response::Response;
use serde_json::{Value, json};
use tower::ServiceExt;

use autoedge_adapter_storage_sqlite_sqlx::{Config, SqliteStorage};
use autoedge_adapter_virtual::VirtualPlatform;
use autoedge_app::agent::Agent;
use autoedge_app::event_bus::InProcessEventBus;
use autoedge_app::ports::SystemClock;
use autoedge_app::settings::EngineSettings;

use crate::router;
use crate::state::AppState;

pub struct TestApp {
    pub agent: Arc<Agent<SqliteStorage, VirtualPlatform, SystemClock>>,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        let database = Config {
            database_url: "sqlite::memory:".to_string(),
        }
        .build()
        .await
        .unwrap();
        let agent = Arc::new(Agent::new(
            Arc::new(database.storage()),
            Arc::new(VirtualPlatform::demo()),
            Arc::new(SystemClock),
            Arc::new(InProcessEventBus::new(64)),
            EngineSettings::default(),
        ));
        agent.start().await.unwrap();
        let router = router::build(AppState::new(Arc::clone(&agent)));
        Self { agent, router }
    }

    pub async fn raw(&self, method: Method, uri: &str) -> Response {
        self.router
            .clone()
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    pub async fn create_spec(&self, spec: Value) -> String {
        let (status, body) = self.send(Method::POST, "/api/specs", Some(spec)).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().to_string()
    }

    pub async fn deployed_spec(&self, spec: Value) -> String {
        let id = self.create_spec(spec).await;
        let (status, body) = self
            .send(Method::POST, &format!("/api/specs/{id}/deploy"), None)
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        id
    }
}

/// A manual spec turning on `light.hall`.
pub fn light_spec(name: &str) -> Value {
    json!({
        "name": name,
        "trigger": {"type": "manual"},
        "actions": [{"type": "turn_on", "target": "entity:light.hall"}]
    })
}
