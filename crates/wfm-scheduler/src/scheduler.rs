//! The per-aggregation-ID scheduling pass.
//!
//! For each aggregation ID the scheduler lists ready intake batches,
//! skips those with existing task markers, enqueues the rest, then
//! computes the aggregation window, intersects own and peer validation
//! batches by ID, and enqueues at most one aggregate task. Each publish
//! callback writes the task marker only after the broker ack, so the
//! marker's presence always implies a confirmed enqueue.
//!
//! No state persists between invocations. A missed cycle is recovered by
//! the next scheduled run discovering markers still absent.

use std::collections::HashSet;
use std::sync::Arc;

use wfm_core::batch_path::{BatchList, ready_batches};
use wfm_core::storage::Bucket;
use wfm_core::time::{Clock, Interval, aggregation_interval, intake_interval};

use crate::enqueue::Enqueuer;
use crate::error::{Error, Result};
use crate::metrics::WorkflowMetrics;
use crate::task::{AggregationTask, IntakeTask, Task, TaskBatch};

/// Everything one scheduling pass over a single aggregation ID needs.
pub struct ScheduleTasksConfig {
    /// The aggregation ID being scheduled.
    pub aggregation_id: String,
    /// Whether this data share processor is the "first" (PHA) server.
    /// The first server emits `validity_0` shares; the second emits
    /// `validity_1`.
    pub is_first: bool,
    /// The bucket the ingestor writes batches into.
    pub intake_bucket: Arc<dyn Bucket>,
    /// The bucket holding this processor's validation batches and all
    /// task markers.
    pub own_validation_bucket: Arc<dyn Bucket>,
    /// The bucket the peer processor writes validation batches into.
    pub peer_validation_bucket: Arc<dyn Bucket>,
    /// Maximum age for intake batches to be worth processing.
    pub max_age: chrono::Duration,
    /// How much time each aggregation covers.
    pub aggregation_period: chrono::Duration,
    /// How long after a window closes before aggregating it.
    pub grace_period: chrono::Duration,
}

impl std::fmt::Debug for ScheduleTasksConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleTasksConfig")
            .field("aggregation_id", &self.aggregation_id)
            .field("is_first", &self.is_first)
            .field("max_age", &self.max_age)
            .field("aggregation_period", &self.aggregation_period)
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

fn validity_infix(first: bool) -> String {
    format!("validity_{}", u8::from(!first))
}

/// Evaluates bucket contents and schedules intake and aggregate tasks
/// for one aggregation ID.
///
/// Both enqueuers are stopped (and therefore drained) before this
/// returns, so every completion callback has run by then.
///
/// # Errors
///
/// Returns an error when a listing fails, a listed key fails to
/// assemble, or a ready batch carries a foreign aggregation ID. Publish
/// failures are not errors here; they surface through completion
/// callbacks and the absent marker retries them next run.
pub async fn schedule_tasks(
    config: &ScheduleTasksConfig,
    clock: &dyn Clock,
    intake_enqueuer: &mut Enqueuer,
    aggregation_enqueuer: &mut Enqueuer,
    metrics: &Arc<WorkflowMetrics>,
) -> Result<()> {
    let intake_window = intake_interval(clock, config.max_age);

    let intake_files = config
        .intake_bucket
        .list_batch_files(&config.aggregation_id, intake_window)
        .await?;
    let intake_batches = ready_batches(&intake_files, "batch")?;

    // A set of the markers we already wrote, for cheap lookup below.
    let intake_markers: HashSet<String> = config
        .own_validation_bucket
        .list_intake_task_markers(&config.aggregation_id, intake_window)
        .await?
        .into_iter()
        .collect();

    enqueue_intake_tasks(
        intake_batches,
        &intake_markers,
        &config.own_validation_bucket,
        intake_enqueuer,
        metrics,
    );

    let aggregation_window =
        aggregation_interval(clock, config.aggregation_period, config.grace_period);
    tracing::info!(
        aggregation_id = %config.aggregation_id,
        interval = %aggregation_window,
        "looking for batches to aggregate"
    );

    let own_validation_files = config
        .own_validation_bucket
        .list_batch_files(&config.aggregation_id, aggregation_window)
        .await?;
    let own_validation_batches =
        ready_batches(&own_validation_files, &validity_infix(config.is_first))?;
    tracing::info!(
        aggregation_id = %config.aggregation_id,
        count = own_validation_batches.len(),
        "found own validations"
    );

    let peer_validation_files = config
        .peer_validation_bucket
        .list_batch_files(&config.aggregation_id, aggregation_window)
        .await?;
    let peer_validation_batches =
        ready_batches(&peer_validation_files, &validity_infix(!config.is_first))?;
    tracing::info!(
        aggregation_id = %config.aggregation_id,
        count = peer_validation_batches.len(),
        "found peer validations"
    );

    // A batch can be aggregated once both processors have validated it.
    // Intersect by batch ID, preserving peer listing order.
    let own_ids: HashSet<&str> = own_validation_batches
        .iter()
        .map(wfm_core::BatchPath::id)
        .collect();
    let aggregation_batches: BatchList = peer_validation_batches
        .into_iter()
        .filter(|batch| own_ids.contains(batch.id()))
        .collect();

    let aggregation_markers: HashSet<String> = config
        .own_validation_bucket
        .list_aggregate_task_markers(&config.aggregation_id)
        .await?
        .into_iter()
        .collect();

    enqueue_aggregation_task(
        &config.aggregation_id,
        aggregation_batches,
        aggregation_window,
        &aggregation_markers,
        &config.own_validation_bucket,
        aggregation_enqueuer,
        metrics,
    )?;

    // Both enqueuers must finish their asynchronous work before the
    // process may exit.
    intake_enqueuer.stop().await;
    aggregation_enqueuer.stop().await;

    Ok(())
}

fn enqueue_intake_tasks(
    ready: BatchList,
    task_markers: &HashSet<String>,
    own_validation_bucket: &Arc<dyn Bucket>,
    enqueuer: &mut Enqueuer,
    metrics: &Arc<WorkflowMetrics>,
) {
    let mut skipped_due_to_marker = 0;
    let mut scheduled = 0;

    for batch in ready {
        let task = IntakeTask {
            aggregation_id: batch.aggregation_id().to_string(),
            batch_id: batch.id().to_string(),
            date: batch.time(),
        };

        if task_markers.contains(&task.marker()) {
            skipped_due_to_marker += 1;
            metrics.inc_intake_skipped();
            continue;
        }

        tracing::info!(
            aggregation_id = %task.aggregation_id,
            batch = %batch,
            "scheduling intake task for batch"
        );
        scheduled += 1;

        let bucket = Arc::clone(own_validation_bucket);
        let metrics = Arc::clone(metrics);
        let marker = task.marker();
        let aggregation_id = task.aggregation_id.clone();
        enqueuer.enqueue(&task, move |result| async move {
            match result {
                Ok(()) => {
                    if let Err(err) = bucket.write_task_marker(&marker).await {
                        tracing::error!(
                            aggregation_id = %aggregation_id,
                            error = %err,
                            "failed to write intake task marker"
                        );
                        return;
                    }
                    metrics.inc_intake_scheduled();
                }
                Err(err) => {
                    tracing::error!(
                        aggregation_id = %aggregation_id,
                        error = %err,
                        "failed to enqueue intake task"
                    );
                }
            }
        });
    }

    tracing::info!(
        skipped_batches = skipped_due_to_marker,
        scheduled_batches = scheduled,
        "skipped and scheduled intake tasks"
    );
}

fn enqueue_aggregation_task(
    aggregation_id: &str,
    ready: BatchList,
    aggregation_window: Interval,
    task_markers: &HashSet<String>,
    own_validation_bucket: &Arc<dyn Bucket>,
    enqueuer: &mut Enqueuer,
    metrics: &Arc<WorkflowMetrics>,
) -> Result<()> {
    if ready.is_empty() {
        tracing::info!(aggregation_id = %aggregation_id, "no batches to aggregate");
        return Ok(());
    }

    let mut batches = Vec::with_capacity(ready.len());
    for batch in &ready {
        if batch.aggregation_id() != aggregation_id {
            return Err(Error::AggregationIdMismatch {
                expected: aggregation_id.to_string(),
                found: batch.aggregation_id().to_string(),
            });
        }
        batches.push(TaskBatch {
            id: batch.id().to_string(),
            time: batch.time(),
        });
    }

    let task = AggregationTask {
        aggregation_id: aggregation_id.to_string(),
        aggregation_start: aggregation_window.begin,
        aggregation_end: aggregation_window.end,
        batches,
    };

    if task_markers.contains(&task.marker()) {
        tracing::info!(
            aggregation_id = %aggregation_id,
            "skipped aggregation task due to marker"
        );
        metrics.inc_aggregation_skipped();
        return Ok(());
    }

    tracing::info!(
        aggregation_id = %aggregation_id,
        aggregation_window = %aggregation_window,
        batch_count = ready.len(),
        "scheduling aggregation task"
    );

    let bucket = Arc::clone(own_validation_bucket);
    let metrics = Arc::clone(metrics);
    let marker = task.marker();
    let aggregation_id = aggregation_id.to_string();
    enqueuer.enqueue(&task, move |result| async move {
        match result {
            Ok(()) => {
                if let Err(err) = bucket.write_task_marker(&marker).await {
                    tracing::error!(
                        aggregation_id = %aggregation_id,
                        error = %err,
                        "failed to write aggregation task marker"
                    );
                }
                metrics.inc_aggregation_scheduled();
            }
            Err(err) => {
                tracing::error!(
                    aggregation_id = %aggregation_id,
                    error = %err,
                    "failed to enqueue aggregation task"
                );
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_infix_follows_role() {
        // The first (PHA) server emits validity_0.
        assert_eq!(validity_infix(true), "validity_0");
        assert_eq!(validity_infix(false), "validity_1");
    }
}
