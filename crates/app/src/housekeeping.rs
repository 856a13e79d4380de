//! Janitor — bounds task history and execution records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use autoedge_domain::error::AutoEdgeError;
use autoedge_domain::time;

use crate::ports::{Clock, Storage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sweep {
    pub tasks_purged: u64,
    pub records_evicted: u64,
}

pub struct Janitor<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    history_retention: Duration,
    max_records: usize,
}

impl<S: Storage, C: Clock> Janitor<S, C> {
    pub fn new(store: Arc<S>, clock: Arc<C>, history_retention: Duration, max_records: usize) -> Self {
        Self {
            store,
            clock,
            history_retention,
            max_records,
        }
    }

    /// Purge finished tasks past retention, then evict the oldest records
    /// beyond the cap.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self) -> Result<Sweep, AutoEdgeError> {
        let cutoff = time::before(self.clock.now(), self.history_retention);
        let sweep = Sweep {
            tasks_purged: self.store.purge_finished_tasks(cutoff).await?,
            records_evicted: self.store.evict_records(self.max_records).await?,
        };
        if sweep != Sweep::default() {
            tracing::info!(
                tasks_purged = sweep.tasks_purged,
                records_evicted = sweep.records_evicted,
                "history swept"
            );
        }
        Ok(sweep)
    }

    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                () = self.clock.sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(err) = self.sweep().await {
                tracing::error!(error = %err, "history sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use autoedge_domain::id::{CorrelationId, SpecId};
    use autoedge_domain::record::ExecutionRecord;

    use super::*;
    use crate::ports::ExecutionRecordStore;
    use crate::testing::{InMemoryStorage, ManualClock};

    #[tokio::test]
    async fn should_evict_oldest_records_beyond_cap() {
        let store = Arc::new(InMemoryStorage::default());
        let clock = Arc::new(ManualClock::default());
        let mut ids = Vec::new();
        for _ in 0..3 {
            let record = ExecutionRecord::new(CorrelationId::new(), SpecId::new(), clock.now());
            store.save_record(&record).await.unwrap();
            ids.push(record.correlation_id);
            clock.advance(Duration::from_secs(1));
        }
        let janitor = Janitor::new(Arc::clone(&store), clock, Duration::from_secs(60), 2);

        let sweep = janitor.sweep().await.unwrap();

        assert_eq!(sweep.records_evicted, 1);
        assert!(store.get_record(ids[0]).await.unwrap().is_none());
        assert!(store.get_record(ids[2]).await.unwrap().is_some());
    }
}
