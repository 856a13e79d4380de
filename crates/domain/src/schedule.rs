//! Cron schedules and the pure next-run computation.
//!
//! Expressions have 5 fields (minute precision) or 6 (leading seconds) and
//! are evaluated in UTC.

use croner::Cron;
use serde::{Deserialize, Serialize};

use crate::id::SpecId;
use crate::time::Timestamp;

/// Parse a cron expression.
///
/// # Errors
///
/// Returns the parser's reason when the expression is malformed.
pub fn parse(expression: &str) -> Result<Cron, String> {
    Cron::new(expression)
        .with_seconds_optional()
        .parse()
        .map_err(|err| err.to_string())
}

/// First occurrence strictly after `after`.
///
/// # Errors
///
/// Returns a reason when the expression is malformed or never fires again.
pub fn next_run_after(expression: &str, after: Timestamp) -> Result<Timestamp, String> {
    parse(expression)?
        .find_next_occurrence(&after, false)
        .map_err(|err| err.to_string())
}

/// A spec's time-based trigger as tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub spec_id: SpecId,
    pub expression: String,
    pub enabled: bool,
    pub next_run: Option<Timestamp>,
    pub last_run: Option<Timestamp>,
}

impl Schedule {
    /// An enabled schedule whose first run is the next occurrence after `now`.
    ///
    /// # Errors
    ///
    /// Returns the reason when the expression cannot be evaluated.
    pub fn enabled(spec_id: SpecId, expression: impl Into<String>, now: Timestamp) -> Result<Self, String> {
        let expression = expression.into();
        let next_run = next_run_after(&expression, now)?;
        Ok(Self {
            spec_id,
            expression,
            enabled: true,
            next_run: Some(next_run),
            last_run: None,
        })
    }

    #[must_use]
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.enabled && self.next_run.is_some_and(|next| next <= now)
    }

    /// Mark the run at `fired_at` as handled and compute the following one.
    ///
    /// Runs missed while the process was down are collapsed: the next run is
    /// the first occurrence after `now`.
    ///
    /// # Errors
    ///
    /// Returns the reason when the expression cannot be evaluated.
    pub fn advance(&mut self, fired_at: Timestamp, now: Timestamp) -> Result<(), String> {
        self.last_run = Some(fired_at);
        self.next_run = Some(next_run_after(&self.expression, now.max(fired_at))?);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the reason when the expression cannot be evaluated.
    pub fn enable(&mut self, now: Timestamp) -> Result<(), String> {
        self.next_run = Some(next_run_after(&self.expression, now)?);
        self.enabled = true;
        Ok(())
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.next_run = None;
    }
}
