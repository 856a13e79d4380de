//! # autoedge-adapter-storage-sqlite-sqlx
//!
//! `SQLite` persistence adapter using [sqlx](https://docs.rs/sqlx).
//!
//! ## Responsibilities
//! - Implement the storage port traits defined in `autoedge-app::ports`
//! - Manage `SQLite` connection pool lifecycle
//! - Run database migrations (using sqlx embedded migrations)
//! - Map between domain types and database rows
//!
//! ## Dependency rule
//! Depends on `autoedge-app` (for port traits) and `autoedge-domain` (for domain types).
//! The `app` and `domain` crates must never reference this adapter.

mod codec;
pub mod control_store;
pub mod error;
pub mod pool;
pub mod record_store;
pub mod spec_repo;
pub mod store;
pub mod task_store;

pub use pool::{Config, Database};
pub use store::SqliteStorage;
