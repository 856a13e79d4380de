//! Clock port — wall time and sleeping, injectable for tests.

use std::future::Future;
use std::time::Duration;

use autoedge_domain::time::{self, Timestamp};

/// Source of time for the engine, the queue and the scheduler.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Timestamp;

    /// Suspend for `duration`.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// The real clock: UTC wall time and [`tokio::time::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        time::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
