//! Spec registry — use-cases over the append-only spec history.

use std::sync::Arc;

use autoedge_domain::error::{AutoEdgeError, NotFoundError, SpecRejection};
use autoedge_domain::id::SpecId;
use autoedge_domain::plan::ExecutionPlan;
use autoedge_domain::planner;
use autoedge_domain::policy::PolicyConfig;
use autoedge_domain::spec::{AutomationSpec, SpecDocument};

use crate::capabilities::CapabilityGraphBuilder;
use crate::ports::{Clock, RemotePlatform, Storage};

/// Application service for creating, versioning and validating specs.
pub struct SpecService<S, R, C> {
    store: Arc<S>,
    graph: Arc<CapabilityGraphBuilder<R, C>>,
    clock: Arc<C>,
    policy: PolicyConfig,
}

impl<S, R, C> SpecService<S, R, C>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    pub fn new(
        store: Arc<S>,
        graph: Arc<CapabilityGraphBuilder<R, C>>,
        clock: Arc<C>,
        policy: PolicyConfig,
    ) -> Self {
        Self {
            store,
            graph,
            clock,
            policy,
        }
    }

    /// Register a new spec as version 1.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::Rejected`] with every structural error, or a
    /// storage error.
    #[tracing::instrument(skip(self, document), fields(name = %document.name))]
    pub async fn create(&self, document: SpecDocument) -> Result<AutomationSpec, AutoEdgeError> {
        self.store_version(SpecId::new(), 1, document).await
    }

    /// Append a new version to an existing spec.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] for an unknown id,
    /// [`AutoEdgeError::Rejected`] on structural errors, or a storage error.
    #[tracing::instrument(skip(self, document))]
    pub async fn update(
        &self,
        id: SpecId,
        document: SpecDocument,
    ) -> Result<AutomationSpec, AutoEdgeError> {
        let latest = self.latest(id).await?;
        self.store_version(id, latest.version + 1, document).await
    }

    async fn store_version(
        &self,
        id: SpecId,
        version: u32,
        document: SpecDocument,
    ) -> Result<AutomationSpec, AutoEdgeError> {
        let spec = AutomationSpec {
            id,
            version,
            name: document.name,
            trigger: document.trigger,
            conditions: document.conditions,
            actions: document.actions,
            policy_tags: document.policy_tags,
            created_at: self.clock.now(),
        };
        let errors = spec.structural_errors();
        if !errors.is_empty() {
            return Err(SpecRejection {
                errors,
                correlation_id: None,
            }
            .into());
        }
        self.store.insert_spec_version(&spec).await?;
        tracing::info!(spec_id = %spec.id, version, "spec version stored");
        Ok(spec)
    }

    /// The deployed version of a spec, or its latest version when undeployed.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] for an unknown id.
    pub async fn get(&self, id: SpecId) -> Result<AutomationSpec, AutoEdgeError> {
        if let Some(rollout) = self.store.get_rollout(id).await?
            && let Some(spec) = self
                .store
                .get_spec_version(id, rollout.active_version)
                .await?
        {
            return Ok(spec);
        }
        self.latest(id).await
    }

    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] when the version does not exist.
    pub async fn get_version(
        &self,
        id: SpecId,
        version: u32,
    ) -> Result<AutomationSpec, AutoEdgeError> {
        self.store
            .get_spec_version(id, version)
            .await?
            .ok_or_else(|| not_found(id, Some(version)))
    }

    async fn latest(&self, id: SpecId) -> Result<AutomationSpec, AutoEdgeError> {
        self.store
            .latest_spec_version(id)
            .await?
            .ok_or_else(|| not_found(id, None))
    }

    /// Every version of a spec, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::NotFound`] for an unknown id.
    pub async fn history(&self, id: SpecId) -> Result<Vec<AutomationSpec>, AutoEdgeError> {
        let versions = self.store.list_spec_versions(id).await?;
        if versions.is_empty() {
            return Err(not_found(id, None));
        }
        Ok(versions)
    }

    /// The active version of every deployed spec.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub async fn list_active(&self) -> Result<Vec<AutomationSpec>, AutoEdgeError> {
        let mut active = Vec::new();
        for rollout in self.store.list_rollouts().await? {
            if let Some(spec) = self
                .store
                .get_spec_version(rollout.spec_id, rollout.active_version)
                .await?
            {
                active.push(spec);
            }
        }
        active.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(active)
    }

    /// Plan a version against the current capability graph without running it.
    ///
    /// # Errors
    ///
    /// Returns [`AutoEdgeError::Rejected`] with the complete report, or
    /// [`AutoEdgeError::NotFound`].
    #[tracing::instrument(skip(self))]
    pub async fn validate(
        &self,
        id: SpecId,
        version: Option<u32>,
    ) -> Result<ExecutionPlan, AutoEdgeError> {
        let spec = match version {
            Some(version) => self.get_version(id, version).await?,
            None => self.latest(id).await?,
        };
        let graph = self.graph.snapshot();
        planner::plan(&spec, &graph, &self.policy).map_err(|errors| {
            tracing::info!(errors = errors.len(), "spec rejected");
            SpecRejection {
                errors,
                correlation_id: None,
            }
            .into()
        })
    }
}

fn not_found(id: SpecId, version: Option<u32>) -> AutoEdgeError {
    NotFoundError {
        entity: "Spec",
        id: match version {
            Some(version) => format!("{id} v{version}"),
            None => id.to_string(),
        },
    }
    .into()
}
