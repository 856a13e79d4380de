//! [`RemotePlatform`] over the platform's REST API.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use autoedge_app::ports::{RemotePlatform, ServiceOutcome};
use autoedge_domain::capability::Inventory;
use autoedge_domain::error::{RemoteError, RemoteErrorKind};
use autoedge_domain::plan::ResolvedCall;
use autoedge_domain::state::EntityState;

use crate::config::RemoteHttpConfig;
use crate::error::{RemoteHttpError, status_kind, transport};
use crate::wire::{DomainDto, StateDto};

/// REST client authenticated with a bearer token.
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    token: String,
}

impl HttpRemote {
    /// # Errors
    ///
    /// Returns [`RemoteHttpError`] when the base url does not parse or the
    /// TLS backend cannot be initialised.
    pub fn new(config: &RemoteHttpConfig) -> Result<Self, RemoteHttpError> {
        let base_url = Url::parse(&config.base_url).map_err(|err| RemoteHttpError::InvalidUrl {
            url: config.base_url.clone(),
            reason: err.to_string(),
        })?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(concat!("autoedge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RemoteHttpError::Client)?;
        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, RemoteError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|err| RemoteError::new(RemoteErrorKind::Protocol, err.to_string()))?;
        Ok(self.client.request(method, url).bearer_auth(&self.token))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = request.send().await.map_err(|err| transport(&err))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!(%status, body, "remote platform refused request");
            return Err(RemoteError::new(status_kind(status), format!("{status}: {body}")));
        }
        response.json().await.map_err(|err| transport(&err))
    }
}

impl RemotePlatform for HttpRemote {
    #[tracing::instrument(skip(self))]
    async fn inventory(&self) -> Result<Inventory, RemoteError> {
        let states: Vec<StateDto> = self.send(self.request(Method::GET, "/api/states")?).await?;
        let domains: Vec<DomainDto> =
            self.send(self.request(Method::GET, "/api/services")?).await?;
        Ok(Inventory {
            entities: states.into_iter().map(Into::into).collect(),
            services: domains.into_iter().flat_map(DomainDto::into_services).collect(),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn entity_state(&self, entity_id: &str) -> Result<EntityState, RemoteError> {
        let state: StateDto = self
            .send(self.request(Method::GET, &format!("/api/states/{entity_id}"))?)
            .await?;
        Ok(EntityState::from(state.state))
    }

    #[tracing::instrument(skip(self, call), fields(call = %call))]
    async fn invoke(&self, call: &ResolvedCall) -> Result<ServiceOutcome, RemoteError> {
        let mut body = call.data.clone();
        if let Some(entity_id) = &call.entity_id {
            body.insert("entity_id".to_string(), Value::String(entity_id.clone()));
        }
        let path = format!("/api/services/{}/{}", call.domain, call.service);
        let changed: Vec<StateDto> = self
            .send(self.request(Method::POST, &path)?.json(&body))
            .await?;
        let resulting_state = call.entity_id.as_ref().and_then(|entity_id| {
            changed
                .into_iter()
                .find(|state| &state.entity_id == entity_id)
                .map(|state| EntityState::from(state.state))
        });
        Ok(ServiceOutcome { resulting_state })
    }
}
