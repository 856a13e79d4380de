//! Tunables of the engine, filled from the binary's configuration.

use std::time::Duration;

use autoedge_domain::circuit::CircuitPolicy;
use autoedge_domain::policy::PolicyConfig;
use autoedge_domain::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub workers: usize,
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    pub circuit: CircuitPolicy,
    pub policy: PolicyConfig,
    pub high_water_mark: usize,
    /// How long a finished task answers for its idempotency key.
    pub idempotency_retention: Duration,
    /// How long finished tasks are kept before the janitor purges them.
    pub history_retention: Duration,
    pub max_records: usize,
    pub refresh_attempts: u32,
    pub refresh_retry_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            call_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            circuit: CircuitPolicy::default(),
            policy: PolicyConfig::default(),
            high_water_mark: 1000,
            idempotency_retention: Duration::from_secs(24 * 3600),
            history_retention: Duration::from_secs(7 * 24 * 3600),
            max_records: 10_000,
            refresh_attempts: 3,
            refresh_retry_delay: Duration::from_secs(1),
        }
    }
}
