//! Per-target circuit breaker state machine.
//!
//! ```text
//! Closed ──(threshold failures)──► Open ──(cooldown elapsed)──► HalfOpen
//!   ▲                                ▲                              │
//!   └────────── trial success ───────┼──────── trial failure ───────┘
//! ```
//!
//! Failures only accumulate while `Closed` or `HalfOpen`. While `Open`, calls
//! are refused locally without contacting the remote platform.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::time::{Timestamp, elapsed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl std::str::FromStr for CircuitStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "open" => Ok(Self::Open),
            "half_open" => Ok(Self::HalfOpen),
            other => Err(format!("unknown circuit status {other:?}")),
        }
    }
}

/// Threshold and cooldown shared by every breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    pub threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Decision for one call against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Closed circuit, call freely.
    Allowed,
    /// The single half-open trial call.
    Trial,
    /// Refused locally.
    Rejected { retry_after: Duration },
}

/// Breaker state for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    pub target: String,
    pub state: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<Timestamp>,
    /// A half-open trial call has been admitted and not yet reported.
    #[serde(default)]
    pub trial_in_flight: bool,
}

impl CircuitState {
    #[must_use]
    pub fn closed(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            state: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    /// Decide whether a call may proceed, moving `Open` to `HalfOpen` once
    /// the cooldown has elapsed.
    pub fn admit(&mut self, policy: &CircuitPolicy, now: Timestamp) -> Admission {
        match self.state {
            CircuitStatus::Closed => Admission::Allowed,
            CircuitStatus::Open => {
                let since = self.opened_at.map_or(policy.cooldown, |at| elapsed(at, now));
                if since >= policy.cooldown {
                    self.state = CircuitStatus::HalfOpen;
                    self.trial_in_flight = true;
                    Admission::Trial
                } else {
                    Admission::Rejected {
                        retry_after: policy.cooldown.saturating_sub(since),
                    }
                }
            }
            CircuitStatus::HalfOpen if self.trial_in_flight => Admission::Rejected {
                retry_after: Duration::ZERO,
            },
            CircuitStatus::HalfOpen => {
                self.trial_in_flight = true;
                Admission::Trial
            }
        }
    }

    /// A call succeeded: close the circuit and reset the failure count.
    pub fn record_success(&mut self) {
        self.state = CircuitStatus::Closed;
        self.consecutive_failures = 0;
        self.opened_at = None;
        self.trial_in_flight = false;
    }

    /// A call failed: count it and open the circuit on threshold or on a
    /// failed trial. Returns `true` when the circuit just opened.
    pub fn record_failure(&mut self, policy: &CircuitPolicy, now: Timestamp) -> bool {
        match self.state {
            CircuitStatus::Open => false,
            CircuitStatus::Closed => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                if self.consecutive_failures >= policy.threshold {
                    self.open(now);
                    true
                } else {
                    false
                }
            }
            CircuitStatus::HalfOpen => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.open(now);
                true
            }
        }
    }

    /// Give back an admitted trial that was never performed.
    pub fn release_trial(&mut self) {
        if self.state == CircuitStatus::HalfOpen {
            self.trial_in_flight = false;
        }
    }

    fn open(&mut self, now: Timestamp) {
        self.state = CircuitStatus::Open;
        self.opened_at = Some(now);
        self.trial_in_flight = false;
    }
}
