//! The single storage type handed to the engine.

use sqlx::SqlitePool;

/// `SQLite`-backed implementation of every storage port.
///
/// The trait implementations live next to the tables they touch:
/// [`spec_repo`](crate::spec_repo), [`task_store`](crate::task_store),
/// [`control_store`](crate::control_store) and
/// [`record_store`](crate::record_store).
#[derive(Clone)]
pub struct SqliteStorage {
    pub(crate) pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new store backed by the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[cfg(test)]
pub(crate) use fixtures::{memory, planned_task};
