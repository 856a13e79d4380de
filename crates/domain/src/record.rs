//! Execution records — the decision trace behind every execution request.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, ValidationError};
use crate::id::{CorrelationId, SpecId, TaskId};
use crate::target::TargetRef;
use crate::task::{TargetEffect, TaskStatus};
use crate::time::Timestamp;

/// One decision taken while handling a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Validated {
        passed: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        errors: Vec<ValidationError>,
    },
    IdempotentReplay {
        task_id: TaskId,
    },
    TargetsResolved {
        targets: Vec<TargetRef>,
    },
    ConditionsEvaluated {
        passed: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    CircuitRejected {
        target: String,
    },
    DryRun {
        effects: Vec<TargetEffect>,
    },
    Attempt {
        attempt: u32,
        /// Index of the plan step the call belongs to.
        step: usize,
        target: TargetRef,
        service: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RemoteError>,
    },
    RetryScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    Cancelled {
        reason: String,
    },
    Recovered,
    Finished {
        status: TaskStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub at: Timestamp,
    #[serde(flatten)]
    pub decision: Decision,
}

/// Append-only trace for one correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub correlation_id: CorrelationId,
    pub task_id: Option<TaskId>,
    pub spec_id: SpecId,
    pub spec_version: Option<u32>,
    pub started_at: Timestamp,
    pub updated_at: Timestamp,
    pub entries: Vec<TraceEntry>,
}

impl ExecutionRecord {
    #[must_use]
    pub fn new(correlation_id: CorrelationId, spec_id: SpecId, now: Timestamp) -> Self {
        Self {
            correlation_id,
            task_id: None,
            spec_id,
            spec_version: None,
            started_at: now,
            updated_at: now,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, decision: Decision, now: Timestamp) {
        self.entries.push(TraceEntry { at: now, decision });
        self.updated_at = now;
    }

    /// Plan steps whose call already succeeded; never invoked again.
    #[must_use]
    pub fn applied_steps(&self) -> BTreeSet<usize> {
        self.entries
            .iter()
            .filter_map(|entry| match &entry.decision {
                Decision::Attempt {
                    step,
                    success: true,
                    ..
                } => Some(*step),
                _ => None,
            })
            .collect()
    }

    /// Number of attempts recorded so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.entries
            .iter()
            .filter_map(|entry| match entry.decision {
                Decision::Attempt { attempt, .. } => Some(attempt),
                _ => None,
            })
            .max()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| matches!(entry.decision, Decision::Finished { .. }))
    }
}
