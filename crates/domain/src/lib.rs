//! # autoedge-domain
//!
//! Pure domain model for the autoedge automation execution engine.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error conventions, timestamps
//! - Define **Automation specs** (typed, versioned trigger → condition → action documents)
//! - Define the **Capability graph** (what the remote platform can address)
//! - Validate specs and bind them into immutable **Execution plans**
//! - Define **Tasks**, their lifecycle and their results
//! - Pure policy state machines: **circuit breaker**, **retry backoff**,
//!   **canary routing**, **cron next-run**
//! - Define **Execution records** (decision traces used to explain outcomes)
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;
pub mod time;

pub mod capability;
pub mod circuit;
pub mod event;
pub mod plan;
pub mod planner;
pub mod policy;
pub mod record;
pub mod retry;
pub mod rollout;
pub mod schedule;
pub mod spec;
pub mod state;
pub mod target;
pub mod task;
