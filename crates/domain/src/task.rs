//! Task — one requested execution of a plan, and its lifecycle.
//!
//! ```text
//! Scheduled ──► Pending ──► Running ──► Succeeded | Failed | Cancelled
//!     │            │           │  ▲
//!     └────────────┴──► Cancelled └──┘ retry
//! ```
//!
//! A `Running` task may go back to `Pending` only through crash recovery.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{RemoteErrorKind, TransitionError};
use crate::id::{CorrelationId, SpecId, TaskId};
use crate::plan::ExecutionPlan;
use crate::state::EntityState;
use crate::target::TargetRef;
use crate::time::Timestamp;

/// Lifecycle status of a [`Task`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Scheduled,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [Self; 6] = [
        Self::Pending,
        Self::Scheduled,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Cancelled,
    ];

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Not yet picked up by a worker.
    #[must_use]
    pub fn is_waiting(self) -> bool {
        matches!(self, Self::Pending | Self::Scheduled)
    }

    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::{Cancelled, Failed, Pending, Running, Scheduled, Succeeded};
        matches!(
            (self, next),
            (Pending | Scheduled, Running | Cancelled)
                | (Scheduled, Pending)
                | (Running, Running | Succeeded | Failed | Cancelled | Pending)
        )
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status {s:?}"))
    }
}

/// Dispatch priority; higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Default for Priority {
    fn default() -> Self {
        Self(50)
    }
}

/// De-duplication key: one effective execution per key within the retention window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Use a caller-supplied key verbatim.
    #[must_use]
    pub fn explicit(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key of a trigger occurrence: `hex(sha256(spec_id "\n" identity))`.
    ///
    /// The spec version is not part of the key, so a rollout change between
    /// two deliveries of the same trigger still collapses them.
    #[must_use]
    pub fn derive(spec_id: SpecId, trigger_identity: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(spec_id.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(trigger_identity.as_bytes());
        let digest = hasher.finalize();
        Self(digest.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    /// The key of a dry run of the same request.
    ///
    /// Dry runs never answer for, or block, the real execution of a trigger.
    #[must_use]
    pub fn for_dry_run(self) -> Self {
        Self(format!("dry-run:{}", self.0))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Final outcome of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    DryRun,
    /// Conditions did not hold; nothing was invoked.
    Skipped { reason: String },
    Failed,
    Cancelled,
}

/// What happened to one call of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectStatus {
    Applied,
    Failed,
    NotAttempted,
    WouldApply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEffect {
    pub target: TargetRef,
    pub service: String,
    pub status: EffectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resulting_state: Option<EntityState>,
}

/// Why a task did not apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Unavailable,
    Rejected,
    Forbidden,
    NotFound,
    Protocol,
    CircuitOpen,
    Cancelled,
    VersionRetired,
}

impl From<RemoteErrorKind> for FailureKind {
    fn from(kind: RemoteErrorKind) -> Self {
        match kind {
            RemoteErrorKind::Timeout => Self::Timeout,
            RemoteErrorKind::Unavailable => Self::Unavailable,
            RemoteErrorKind::Rejected => Self::Rejected,
            RemoteErrorKind::Forbidden => Self::Forbidden,
            RemoteErrorKind::NotFound => Self::NotFound,
            RemoteErrorKind::Protocol => Self::Protocol,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TargetRef>,
}

/// Result attached to a task once it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub outcome: Outcome,
    pub effects: Vec<TargetEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    pub finished_at: Timestamp,
}

/// Per-request options for building a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub idempotency_key: IdempotencyKey,
    pub trigger_identity: String,
    pub correlation_id: CorrelationId,
    pub priority: Priority,
    /// Earliest dispatch time; `None` means now.
    pub not_before: Option<Timestamp>,
    pub dry_run: bool,
}

/// A requested execution of an [`ExecutionPlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub spec_id: SpecId,
    pub spec_version: u32,
    pub idempotency_key: IdempotencyKey,
    pub trigger_identity: String,
    pub correlation_id: CorrelationId,
    pub status: TaskStatus,
    pub priority: Priority,
    pub not_before: Timestamp,
    /// Enqueue order, the FIFO tie-break between equal priorities.
    pub sequence: u64,
    pub attempt_count: u32,
    pub dry_run: bool,
    pub plan: ExecutionPlan,
    pub result: Option<TaskResult>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Task {
    /// Create a task from a validated plan.
    ///
    /// The task is `Scheduled` when `not_before` lies in the future and
    /// `Pending` otherwise. The sequence is assigned by the queue.
    #[must_use]
    pub fn from_plan(plan: ExecutionPlan, options: TaskOptions, now: Timestamp) -> Self {
        let not_before = options.not_before.unwrap_or(now);
        let status = if not_before > now {
            TaskStatus::Scheduled
        } else {
            TaskStatus::Pending
        };
        Self {
            id: TaskId::new(),
            spec_id: plan.spec_id(),
            spec_version: plan.spec_version(),
            idempotency_key: options.idempotency_key,
            trigger_identity: options.trigger_identity,
            correlation_id: options.correlation_id,
            status,
            priority: options.priority,
            not_before,
            sequence: 0,
            attempt_count: 0,
            dry_run: options.dry_run,
            plan,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing impossible transitions.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when the lifecycle forbids the move.
    pub fn transition(&mut self, next: TaskStatus, now: Timestamp) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                task_id: self.id.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Record the terminal status and its result.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] when `status` is not reachable or not terminal.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        result: TaskResult,
        now: Timestamp,
    ) -> Result<(), TransitionError> {
        if !status.is_terminal() {
            return Err(TransitionError {
                task_id: self.id.to_string(),
                from: self.status.to_string(),
                to: status.to_string(),
            });
        }
        self.transition(status, now)?;
        self.result = Some(result);
        Ok(())
    }

    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.not_before <= now
    }
}

/// Criteria for listing tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFilter {
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub spec_id: Option<SpecId>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl TaskFilter {
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|status| task.status == status)
            && self.spec_id.is_none_or(|spec_id| task.spec_id == spec_id)
    }
}
