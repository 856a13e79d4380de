//! Worker pool pulling tasks from the queue into the engine.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::ExecutionEngine;
use crate::health::Health;
use crate::ports::{Clock, RemotePlatform, Storage};
use crate::queue::TaskQueue;

/// Runs claimed tasks on a fixed number of workers.
///
/// Each worker runs one task at a time, so the pool bounds the number of
/// in-flight executions. A worker that hits a fatal error records it and
/// stops; the others keep going.
pub struct Dispatcher<S, R, C> {
    queue: Arc<TaskQueue<S, C>>,
    engine: Arc<ExecutionEngine<S, R, C>>,
    health: Arc<Health>,
    clock: Arc<C>,
}

impl<S, R, C> Dispatcher<S, R, C>
where
    S: Storage,
    R: RemotePlatform,
    C: Clock,
{
    pub fn new(
        queue: Arc<TaskQueue<S, C>>,
        engine: Arc<ExecutionEngine<S, R, C>>,
        health: Arc<Health>,
        clock: Arc<C>,
    ) -> Self {
        Self {
            queue,
            engine,
            health,
            clock,
        }
    }

    /// Spawn `workers` workers that stop when `shutdown` flips to `true`.
    pub fn spawn(
        self: &Arc<Self>,
        workers: usize,
        shutdown: &watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|worker| {
                let this = Arc::clone(self);
                let shutdown = shutdown.clone();
                tokio::spawn(async move { this.work(worker, shutdown).await })
            })
            .collect()
    }

    #[tracing::instrument(skip(self, shutdown))]
    async fn work(&self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!("worker started");
        loop {
            let task = match self.queue.next(&mut shutdown).await {
                Ok(Some(task)) => task,
                Ok(None) => break,
                Err(err) if err.is_fatal() => {
                    self.health.record_fatal(worker, &err, self.clock.now());
                    return;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to claim task");
                    continue;
                }
            };
            let task_id = task.id;
            match self.engine.run(task).await {
                Ok(executed) => {
                    tracing::debug!(%task_id, status = %executed.task.status, "task done");
                }
                Err(err) if err.is_fatal() => {
                    self.health.record_fatal(worker, &err, self.clock.now());
                    return;
                }
                Err(err) => tracing::warn!(%task_id, error = %err, "task execution failed"),
            }
        }
        tracing::debug!("worker stopped");
    }
}
