//! # autoedge-adapter-remote-http
//!
//! Drives the remote smart-home platform through its REST API.
//!
//! ## Responsibilities
//! - Implement [`RemotePlatform`](autoedge_app::ports::RemotePlatform):
//!   inventory (`GET /api/states`, `GET /api/services`), entity state
//!   (`GET /api/states/{id}`) and service calls
//!   (`POST /api/services/{domain}/{service}`)
//! - Authenticate with a bearer token
//! - Classify every failure so the engine knows what to retry
//!
//! ## Dependency rule
//! Depends on `autoedge-app` (for the port trait) and `autoedge-domain`.

pub mod client;
pub mod config;
pub mod error;
mod wire;

pub use client::HttpRemote;
pub use config::RemoteHttpConfig;
pub use error::RemoteHttpError;
