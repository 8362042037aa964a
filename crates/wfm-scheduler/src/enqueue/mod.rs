//! Task enqueueing with bounded parallelism.
//!
//! This module provides:
//!
//! - [`TaskPublisher`]: the broker-specific publish operation (GCP
//!   Pub/Sub, AWS SNS, or the in-memory test double)
//! - [`Enqueuer`]: the bounded worker pool that drives a publisher and
//!   invokes a completion callback exactly once per submitted task
//!
//! `enqueue` returns immediately; the publish proceeds asynchronously on
//! a worker bounded by the pool's semaphore. A publish failure is
//! reported through the callback only and never aborts the scheduler
//! run, since the absent task marker guarantees a retry on the next run.
//! `stop` blocks until every outstanding callback has returned; only
//! then is it safe for the process to exit.

pub mod aws_sns;
pub mod gcp_pubsub;
pub mod memory;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::task::Task;

pub use aws_sns::SnsPublisher;
pub use gcp_pubsub::PubSubPublisher;
pub use memory::MemoryPublisher;

/// Default bound on concurrent publishes.
pub const DEFAULT_MAX_ENQUEUE_WORKERS: usize = 100;

/// Publishes one serialized task message to a broker topic.
#[async_trait]
pub trait TaskPublisher: Send + Sync + 'static {
    /// Publishes `body` and returns once the broker has acknowledged it
    /// or the publish has permanently failed.
    async fn publish(&self, body: String) -> Result<()>;

    /// The topic this publisher targets, for log lines.
    fn topic(&self) -> &str;
}

/// A bounded pool of publish workers with per-task completion callbacks.
pub struct Enqueuer {
    publisher: Arc<dyn TaskPublisher>,
    permits: Arc<Semaphore>,
    workers: JoinSet<()>,
}

impl Enqueuer {
    /// Creates an enqueuer allowing at most `max_workers` concurrent
    /// publishes.
    #[must_use]
    pub fn new(publisher: Arc<dyn TaskPublisher>, max_workers: usize) -> Self {
        Self {
            publisher,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
            workers: JoinSet::new(),
        }
    }

    /// Submits `task` for publication and returns immediately.
    ///
    /// `on_complete` is invoked exactly once, on a worker, with the
    /// publish outcome. The callback typically writes the task marker on
    /// success; it runs after the broker ack, so a marker never precedes
    /// a confirmed publish.
    pub fn enqueue<T, F, Fut>(&mut self, task: &T, on_complete: F)
    where
        T: Task,
        F: FnOnce(Result<()>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let body = match serde_json::to_string(task) {
            Ok(body) => body,
            Err(err) => {
                let kind = task.kind();
                self.workers.spawn(async move {
                    on_complete(Err(Error::dispatch(format!(
                        "serializing {kind} task: {err}"
                    ))))
                    .await;
                });
                return;
            }
        };

        let publisher = Arc::clone(&self.publisher);
        let permits = Arc::clone(&self.permits);
        self.workers.spawn(async move {
            let result = match permits.acquire_owned().await {
                Ok(permit) => {
                    let result = publisher.publish(body).await;
                    drop(permit);
                    result
                }
                Err(_) => Err(Error::dispatch("enqueuer worker pool is closed")),
            };
            on_complete(result).await;
        });
    }

    /// Waits for every outstanding publish and callback to finish.
    ///
    /// After `stop` returns, no further callback executes. Individual
    /// publish failures were already reported through their callbacks;
    /// `stop` itself never fails.
    pub async fn stop(&mut self) {
        while let Some(joined) = self.workers.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "enqueue worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for Enqueuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enqueuer")
            .field("topic", &self.publisher.topic())
            .field("outstanding", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::IntakeTask;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_task(batch_id: &str) -> IntakeTask {
        IntakeTask {
            aggregation_id: "kittens-seen".into(),
            batch_id: batch_id.into(),
            date: Utc.with_ymd_and_hms(2020, 10, 31, 20, 29, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn callback_runs_exactly_once_per_enqueue() {
        let publisher = Arc::new(MemoryPublisher::new("intake-tasks"));
        let mut enqueuer = Enqueuer::new(Arc::clone(&publisher) as Arc<dyn TaskPublisher>, 4);
        let completions = Arc::new(AtomicUsize::new(0));

        for i in 0..10 {
            let completions = Arc::clone(&completions);
            enqueuer.enqueue(&test_task(&format!("uuid-{i}")), move |result| async move {
                assert!(result.is_ok());
                completions.fetch_add(1, Ordering::SeqCst);
            });
        }
        enqueuer.stop().await;

        assert_eq!(completions.load(Ordering::SeqCst), 10);
        assert_eq!(publisher.published().len(), 10);
    }

    #[tokio::test]
    async fn publish_failure_reaches_callback() {
        let publisher = Arc::new(MemoryPublisher::new("intake-tasks"));
        publisher.fail_publishes(true);
        let mut enqueuer = Enqueuer::new(Arc::clone(&publisher) as Arc<dyn TaskPublisher>, 4);
        let failures = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&failures);
        enqueuer.enqueue(&test_task("uuid-0"), move |result| async move {
            if result.is_err() {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        });
        enqueuer.stop().await;

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(publisher.published().is_empty());
    }

    #[tokio::test]
    async fn stop_is_a_barrier_for_callbacks() {
        let publisher = Arc::new(MemoryPublisher::new("intake-tasks"));
        publisher.delay_publishes(std::time::Duration::from_millis(20));
        let mut enqueuer = Enqueuer::new(Arc::clone(&publisher) as Arc<dyn TaskPublisher>, 2);
        let completions = Arc::new(AtomicUsize::new(0));

        for i in 0..6 {
            let completions = Arc::clone(&completions);
            enqueuer.enqueue(&test_task(&format!("uuid-{i}")), move |_| async move {
                completions.fetch_add(1, Ordering::SeqCst);
            });
        }
        enqueuer.stop().await;

        // Every callback has returned by the time stop() does.
        assert_eq!(completions.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn enqueuer_is_reusable_after_stop() {
        let publisher = Arc::new(MemoryPublisher::new("intake-tasks"));
        let mut enqueuer = Enqueuer::new(Arc::clone(&publisher) as Arc<dyn TaskPublisher>, 2);

        enqueuer.enqueue(&test_task("uuid-0"), |_| async {});
        enqueuer.stop().await;
        enqueuer.enqueue(&test_task("uuid-1"), |_| async {});
        enqueuer.stop().await;

        assert_eq!(publisher.published().len(), 2);
    }
}
