//! # autoedge-adapter-http-axum
//!
//! HTTP adapter built on [axum](https://docs.rs/axum).
//!
//! ## Responsibilities
//! - Serve the **JSON control API** under `/api`: spec registry,
//!   executions, tasks, schedules, rollouts, the kill switch,
//!   explainability and the capability graph
//! - Ingest platform state changes (`POST /api/events`) and stream engine
//!   events over SSE (`GET /api/events/stream`)
//! - Report engine health on `/health` (`503` once a worker halted)
//! - Map [`AutoEdgeError`](autoedge_domain::error::AutoEdgeError) to
//!   structured `{ error, kind, details }` responses
//!
//! ## Dependency rule
//! Depends on `autoedge-app` (for port traits and services) and
//! `autoedge-domain` (for request/response types). Never leaks axum types
//! into the domain.

pub mod api;
pub mod error;
pub mod router;
pub mod state;

#[cfg(test)]
mod testing;
