//! Engine health: healthy until a worker hits a fatal error.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// A fatal error that halted a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Incident {
    pub worker: usize,
    pub error: String,
    pub at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub kill_switch: bool,
    pub queue_depth: usize,
    pub workers: usize,
    pub halted_workers: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub incidents: Vec<Incident>,
}

/// Fatal errors reported by the worker pool.
#[derive(Debug, Default)]
pub struct Health {
    incidents: Mutex<Vec<Incident>>,
}

impl Health {
    pub fn record_fatal(&self, worker: usize, error: &AutoEdgeError, at: Timestamp) {
        tracing::error!(worker, error = %error, "worker halted on fatal error");
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Incident {
                worker,
                error: error.to_string(),
                at,
            });
    }

    #[must_use]
    pub fn status(&self) -> HealthStatus {
        if self.incidents().is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }

    #[must_use]
    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
