//! Common error types used across the workspace.
//!
//! Each layer defines its own typed errors and converts into
//! [`AutoEdgeError`] via `#[from]`. Every variant carries a structured
//! reason so callers never have to parse a message.

use serde::{Deserialize, Serialize};

use crate::id::CorrelationId;

/// Top-level error for every fallible domain and application operation.
#[derive(Debug, thiserror::Error)]
pub enum AutoEdgeError {
    /// A single invariant or input check failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A spec was rejected by the planner; carries the complete report.
    #[error(transparent)]
    Rejected(#[from] SpecRejection),

    /// The requested record does not exist.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// A target's circuit breaker is open; no remote call was attempted.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// The task queue is above its high-water mark.
    #[error(transparent)]
    QueueSaturated(#[from] QueueSaturatedError),

    /// The remote platform call failed.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// A rollout operation is not applicable in the current state.
    #[error(transparent)]
    Rollout(#[from] RolloutError),

    /// An impossible task state transition was requested.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// The persistence layer failed.
    #[error("storage error")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AutoEdgeError {
    /// Whether the error indicates corrupt state or a programming error
    /// rather than an ordinary execution failure.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::InvalidTransition(_))
    }
}

/// A typed validation failure: kind plus the offending reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    /// The spec name is empty.
    #[error("name must not be empty")]
    EmptyName,

    /// The spec declares no action.
    #[error("at least one action is required")]
    NoActions,

    /// A referenced entity or service is absent from the capability graph.
    #[error("target {reference} is not available")]
    TargetUnavailable { reference: String },

    /// The target exists but does not offer the requested service.
    #[error("service {service} is not offered for {reference}")]
    UnknownService { reference: String, service: String },

    /// A parameter is outside the target's declared capability schema.
    #[error("parameter {parameter} is incompatible with {reference}: {reason}")]
    IncompatibleParameter {
        reference: String,
        parameter: String,
        reason: String,
    },

    /// A parameter required by the service is missing.
    #[error("parameter {parameter} is required by {reference}")]
    MissingParameter { reference: String, parameter: String },

    /// A configured policy gate refused the spec.
    #[error("policy violation on {reference}: {rule}")]
    PolicyViolation { reference: String, rule: String },

    /// The trigger definition is malformed (e.g. unparseable cron).
    #[error("invalid trigger {reference}: {reason}")]
    InvalidTrigger { reference: String, reason: String },

    /// A condition definition is malformed.
    #[error("invalid condition {reference}: {reason}")]
    InvalidCondition { reference: String, reason: String },

    /// A target reference could not be parsed.
    #[error("invalid target reference {reference:?}")]
    InvalidTargetRef { reference: String },

    /// A canary percentage outside `1..=99`.
    #[error("canary percentage must be between 1 and 99, got {percentage}")]
    InvalidPercentage { percentage: u8 },
}

impl ValidationError {
    /// Short machine-readable kind, matching the serialized `kind` tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmptyName => "empty_name",
            Self::NoActions => "no_actions",
            Self::TargetUnavailable { .. } => "target_unavailable",
            Self::UnknownService { .. } => "unknown_service",
            Self::IncompatibleParameter { .. } => "incompatible_parameter",
            Self::MissingParameter { .. } => "missing_parameter",
            Self::PolicyViolation { .. } => "policy_violation",
            Self::InvalidTrigger { .. } => "invalid_trigger",
            Self::InvalidCondition { .. } => "invalid_condition",
            Self::InvalidTargetRef { .. } => "invalid_target_ref",
            Self::InvalidPercentage { .. } => "invalid_percentage",
        }
    }

    /// Whether this error reports a missing capability-graph target.
    #[must_use]
    pub fn is_target_unavailable(&self) -> bool {
        matches!(self, Self::TargetUnavailable { .. })
    }
}

/// Complete rejection report produced when a spec fails planning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("spec rejected with {} error(s)", errors.len())]
pub struct SpecRejection {
    /// Every failed check, in check order.
    pub errors: Vec<ValidationError>,
    /// Correlation id of the execution record describing the rejection.
    pub correlation_id: Option<CorrelationId>,
}

/// Returned when a lookup by id finds nothing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{entity} {id} not found")]
pub struct NotFoundError {
    pub entity: &'static str,
    pub id: String,
}

/// Returned when a target's breaker refuses a call without contacting it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit for {target} is open, retry in {retry_after_ms}ms")]
pub struct CircuitOpenError {
    pub target: String,
    pub retry_after_ms: u64,
}

/// Backpressure signal: the caller should retry later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("queue saturated ({depth} tasks, high-water mark {high_water_mark})")]
pub struct QueueSaturatedError {
    pub depth: usize,
    pub high_water_mark: usize,
}

/// Failure classes reported by the remote platform client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    /// The call did not complete within its deadline.
    Timeout,
    /// The platform is unreachable or answered with a transient 5xx.
    Unavailable,
    /// The platform refused the call as invalid (4xx).
    Rejected,
    /// The credentials are not allowed to perform the call.
    Forbidden,
    /// The addressed entity or service does not exist remotely.
    NotFound,
    /// The response could not be understood.
    Protocol,
}

/// A failed remote platform call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("remote call failed ({kind:?}): {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    #[must_use]
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Timeouts and transient unavailability are worth another attempt;
    /// everything else terminates the task immediately.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::Timeout | RemoteErrorKind::Unavailable
        )
    }
}

/// Rollout operations that do not apply to the spec's current rollout state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RolloutError {
    /// The spec has never been deployed.
    #[error("spec {spec_id} is not deployed")]
    NotDeployed { spec_id: String },

    /// There is no registered version newer than the active one.
    #[error("spec {spec_id} has no version newer than {active_version}")]
    NoCandidateVersion { spec_id: String, active_version: u32 },

    /// Promotion requires a canary in progress.
    #[error("spec {spec_id} has no canary in progress")]
    NotInCanary { spec_id: String },

    /// Rollback requires a previous version.
    #[error("spec {spec_id} has no previous version to roll back to")]
    NothingToRollBack { spec_id: String },

    /// The spec's rollout is paused; resume it first.
    #[error("spec {spec_id} rollout is paused")]
    Paused { spec_id: String },
}

/// An impossible task lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub task_id: String,
    pub from: String,
    pub to: String,
}
