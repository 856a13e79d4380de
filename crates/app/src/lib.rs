//! # autoedge-app
//!
//! Application layer — use-cases and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters must implement (driven/outbound ports):
//!   - `Storage` — spec versions, tasks, circuits, rollouts, records, schedules
//!   - `RemotePlatform` — inventory, entity state and service calls
//!   - `Clock` — wall time and sleeping, replaceable in tests
//!   - `EventPublisher` — fan-out of engine events
//! - Provide the **services** inbound adapters drive:
//!   - `SpecService` — versioned spec registry and plan validation
//!   - `ExecutionService` — idempotent execution requests
//!   - `TaskQueue`, `ExecutionEngine`, `Dispatcher` — queued execution
//!   - `Scheduler`, `TriggerRouter` — cron and event triggers
//!   - `RolloutManager` — canary, rollback and the kill switch
//! - Wire them together in [`agent::Agent`]
//!
//! ## Dependency rule
//! Depends on `autoedge-domain` only (plus `tokio` for sync primitives).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod agent;
pub mod capabilities;
pub mod circuits;
pub mod dispatcher;
pub mod engine;
pub mod event_bus;
pub mod execution;
pub mod health;
pub mod housekeeping;
pub mod locks;
pub mod ports;
pub mod queue;
mod records;
pub mod rollout;
pub mod router;
pub mod scheduler;
pub mod settings;
pub mod specs;

#[cfg(test)]
pub(crate) mod testing;
