//! Remote platform port — the smart-home control surface the engine drives.

use std::future::Future;

use serde::{Deserialize, Serialize};

use autoedge_domain::capability::Inventory;
use autoedge_domain::error::RemoteError;
use autoedge_domain::plan::ResolvedCall;
use autoedge_domain::state::EntityState;

/// What the platform reported after a successful service call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOutcome {
    /// State of the targeted entity after the call, when the platform reports it.
    pub resulting_state: Option<EntityState>,
}

/// Request/response API of the remote platform.
///
/// Implementations classify every failure into a
/// [`RemoteErrorKind`](autoedge_domain::error::RemoteErrorKind); the engine
/// relies on it to decide whether to retry.
pub trait RemotePlatform: Send + Sync + 'static {
    /// Fetch every addressable entity and service.
    fn inventory(&self) -> impl Future<Output = Result<Inventory, RemoteError>> + Send;

    /// Current state of one entity.
    fn entity_state(
        &self,
        entity_id: &str,
    ) -> impl Future<Output = Result<EntityState, RemoteError>> + Send;

    /// Invoke a service.
    fn invoke(
        &self,
        call: &ResolvedCall,
    ) -> impl Future<Output = Result<ServiceOutcome, RemoteError>> + Send;
}
