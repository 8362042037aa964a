//! End-to-end scheduling scenarios against in-memory buckets and an
//! in-memory task publisher.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use wfm_core::storage::{Bucket, MemoryBucket};
use wfm_core::time::FixedClock;

use wfm_scheduler::enqueue::{Enqueuer, MemoryPublisher, TaskPublisher};
use wfm_scheduler::metrics::WorkflowMetrics;
use wfm_scheduler::scheduler::{ScheduleTasksConfig, schedule_tasks};

const UUID1: &str = "b8a5579a-f984-460a-a42d-2813cbf57771";
const UUID_A: &str = "aaaaaaaa-0000-4000-8000-000000000001";
const UUID_B: &str = "bbbbbbbb-0000-4000-8000-000000000002";
const UUID_C: &str = "cccccccc-0000-4000-8000-000000000003";
const UUID_D: &str = "dddddddd-0000-4000-8000-000000000004";

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

fn seed_batch(bucket: &MemoryBucket, date: &str, id: &str, infix: &str) {
    let base = format!("kittens-seen/{date}/{id}");
    bucket.insert(format!("{base}.{infix}"));
    bucket.insert(format!("{base}.{infix}.avro"));
    bucket.insert(format!("{base}.{infix}.sig"));
}

struct Harness {
    intake_bucket: Arc<MemoryBucket>,
    own_validation_bucket: Arc<MemoryBucket>,
    peer_validation_bucket: Arc<MemoryBucket>,
    intake_publisher: Arc<MemoryPublisher>,
    aggregation_publisher: Arc<MemoryPublisher>,
    metrics: Arc<WorkflowMetrics>,
}

impl Harness {
    fn new() -> Self {
        Self {
            intake_bucket: Arc::new(MemoryBucket::new()),
            own_validation_bucket: Arc::new(MemoryBucket::new()),
            peer_validation_bucket: Arc::new(MemoryBucket::new()),
            intake_publisher: Arc::new(MemoryPublisher::new("intake-tasks")),
            aggregation_publisher: Arc::new(MemoryPublisher::new("aggregate-tasks")),
            metrics: Arc::new(WorkflowMetrics::new()),
        }
    }

    /// Runs one scheduling pass for `kittens-seen` with the production
    /// defaults: max age 1h, period 3h, grace 1h, role first.
    async fn run(&self, now: DateTime<Utc>) {
        let config = ScheduleTasksConfig {
            aggregation_id: "kittens-seen".to_string(),
            is_first: true,
            intake_bucket: Arc::clone(&self.intake_bucket) as Arc<dyn Bucket>,
            own_validation_bucket: Arc::clone(&self.own_validation_bucket) as Arc<dyn Bucket>,
            peer_validation_bucket: Arc::clone(&self.peer_validation_bucket) as Arc<dyn Bucket>,
            max_age: Duration::hours(1),
            aggregation_period: Duration::hours(3),
            grace_period: Duration::hours(1),
        };

        let mut intake_enqueuer =
            Enqueuer::new(Arc::clone(&self.intake_publisher) as Arc<dyn TaskPublisher>, 4);
        let mut aggregation_enqueuer =
            Enqueuer::new(Arc::clone(&self.aggregation_publisher) as Arc<dyn TaskPublisher>, 4);

        schedule_tasks(
            &config,
            &FixedClock(now),
            &mut intake_enqueuer,
            &mut aggregation_enqueuer,
            &self.metrics,
        )
        .await
        .expect("scheduling pass failed");
    }
}

fn published_json(publisher: &MemoryPublisher) -> Vec<serde_json::Value> {
    publisher
        .published()
        .iter()
        .map(|body| serde_json::from_str(body).expect("published body is not JSON"))
        .collect()
}

#[tokio::test]
async fn intake_happy_path() {
    let harness = Harness::new();
    seed_batch(&harness.intake_bucket, "2020/10/31/20/29", UUID1, "batch");

    harness.run(utc(2020, 10, 31, 20, 45)).await;

    assert_eq!(
        published_json(&harness.intake_publisher),
        vec![serde_json::json!({
            "aggregation-id": "kittens-seen",
            "batch-id": UUID1,
            "date": "2020/10/31/20/29",
        })]
    );
    assert!(harness
        .own_validation_bucket
        .contains(&format!("task-markers/intake-kittens-seen-{UUID1}")));
    assert_eq!(harness.metrics.intake_tasks_scheduled(), 1);
    assert!(harness.aggregation_publisher.published().is_empty());
}

#[tokio::test]
async fn idempotent_rerun_skips_marked_batches() {
    let harness = Harness::new();
    seed_batch(&harness.intake_bucket, "2020/10/31/20/29", UUID1, "batch");

    harness.run(utc(2020, 10, 31, 20, 45)).await;
    assert_eq!(harness.intake_publisher.published().len(), 1);

    harness.run(utc(2020, 10, 31, 20, 46)).await;

    assert_eq!(harness.intake_publisher.published().len(), 1);
    assert_eq!(harness.metrics.intake_tasks_skipped(), 1);
}

#[tokio::test]
async fn incomplete_batch_is_not_scheduled() {
    let harness = Harness::new();
    let base = format!("kittens-seen/2020/10/31/20/29/{UUID1}");
    harness.intake_bucket.insert(format!("{base}.batch"));
    harness.intake_bucket.insert(format!("{base}.batch.avro"));

    harness.run(utc(2020, 10, 31, 20, 45)).await;

    assert!(harness.intake_publisher.published().is_empty());
    assert!(!harness
        .own_validation_bucket
        .contains(&format!("task-markers/intake-kittens-seen-{UUID1}")));
    assert_eq!(harness.metrics.intake_tasks_scheduled(), 0);
}

#[tokio::test]
async fn aggregation_intersects_own_and_peer_validations() {
    let harness = Harness::new();
    for id in [UUID_A, UUID_B, UUID_C] {
        seed_batch(
            &harness.own_validation_bucket,
            "2020/10/31/20/29",
            id,
            "validity_0",
        );
    }
    for id in [UUID_B, UUID_C, UUID_D] {
        seed_batch(
            &harness.peer_validation_bucket,
            "2020/10/31/20/29",
            id,
            "validity_1",
        );
    }

    // 21:30 minus 1h grace falls in the 18:00-21:00 window.
    harness.run(utc(2020, 10, 31, 21, 30)).await;

    assert_eq!(
        published_json(&harness.aggregation_publisher),
        vec![serde_json::json!({
            "aggregation-id": "kittens-seen",
            "aggregation-start": "2020/10/31/18/00",
            "aggregation-end": "2020/10/31/21/00",
            "batches": [
                {"id": UUID_B, "time": "2020/10/31/20/29"},
                {"id": UUID_C, "time": "2020/10/31/20/29"},
            ],
        })]
    );
    assert!(harness.own_validation_bucket.contains(
        "task-markers/aggregate-kittens-seen-2020-10-31T18:00:00Z-2020-10-31T21:00:00Z"
    ));
    assert_eq!(harness.metrics.aggregation_tasks_scheduled(), 1);
}

#[tokio::test]
async fn aggregation_marker_suppresses_reenqueue() {
    let harness = Harness::new();
    seed_batch(
        &harness.own_validation_bucket,
        "2020/10/31/20/29",
        UUID_B,
        "validity_0",
    );
    seed_batch(
        &harness.peer_validation_bucket,
        "2020/10/31/20/29",
        UUID_B,
        "validity_1",
    );
    harness.own_validation_bucket.insert(
        "task-markers/aggregate-kittens-seen-2020-10-31T18:00:00Z-2020-10-31T21:00:00Z",
    );

    harness.run(utc(2020, 10, 31, 21, 30)).await;

    assert!(harness.aggregation_publisher.published().is_empty());
    assert_eq!(harness.metrics.aggregation_tasks_skipped(), 1);
}

#[tokio::test]
async fn window_with_only_one_side_enqueues_nothing() {
    let harness = Harness::new();
    seed_batch(
        &harness.own_validation_bucket,
        "2020/10/31/20/29",
        UUID_A,
        "validity_0",
    );

    harness.run(utc(2020, 10, 31, 21, 30)).await;

    assert!(harness.aggregation_publisher.published().is_empty());
    assert_eq!(harness.metrics.aggregation_tasks_scheduled(), 0);
    assert_eq!(harness.metrics.aggregation_tasks_skipped(), 0);
}

#[tokio::test]
async fn publish_failure_leaves_no_marker_and_retries_next_run() {
    let harness = Harness::new();
    seed_batch(&harness.intake_bucket, "2020/10/31/20/29", UUID1, "batch");
    harness.intake_publisher.fail_publishes(true);

    harness.run(utc(2020, 10, 31, 20, 45)).await;

    assert!(harness.intake_publisher.published().is_empty());
    assert!(!harness
        .own_validation_bucket
        .contains(&format!("task-markers/intake-kittens-seen-{UUID1}")));
    assert_eq!(harness.metrics.intake_tasks_scheduled(), 0);

    // The broker recovers; the next run re-enqueues the same task.
    harness.intake_publisher.fail_publishes(false);
    harness.run(utc(2020, 10, 31, 20, 50)).await;

    assert_eq!(harness.intake_publisher.published().len(), 1);
    assert!(harness
        .own_validation_bucket
        .contains(&format!("task-markers/intake-kittens-seen-{UUID1}")));
    assert_eq!(harness.metrics.intake_tasks_scheduled(), 1);
}

#[tokio::test]
async fn empty_bucket_is_a_noop_success() {
    let harness = Harness::new();
    harness.run(utc(2020, 10, 31, 20, 45)).await;

    assert!(harness.intake_publisher.published().is_empty());
    assert!(harness.aggregation_publisher.published().is_empty());
}

#[tokio::test]
async fn batches_outside_intake_window_are_ignored() {
    let harness = Harness::new();
    // Two hours old with a one-hour max age.
    seed_batch(&harness.intake_bucket, "2020/10/31/18/45", UUID1, "batch");

    harness.run(utc(2020, 10, 31, 20, 45)).await;

    assert!(harness.intake_publisher.published().is_empty());
}

#[tokio::test]
async fn second_role_uses_opposite_validity_indexes() {
    let harness = Harness::new();
    // As the second server, own validations carry validity_1 and peer
    // validations carry validity_0.
    seed_batch(
        &harness.own_validation_bucket,
        "2020/10/31/20/29",
        UUID_A,
        "validity_1",
    );
    seed_batch(
        &harness.peer_validation_bucket,
        "2020/10/31/20/29",
        UUID_A,
        "validity_0",
    );

    let config = ScheduleTasksConfig {
        aggregation_id: "kittens-seen".to_string(),
        is_first: false,
        intake_bucket: Arc::clone(&harness.intake_bucket) as Arc<dyn Bucket>,
        own_validation_bucket: Arc::clone(&harness.own_validation_bucket) as Arc<dyn Bucket>,
        peer_validation_bucket: Arc::clone(&harness.peer_validation_bucket) as Arc<dyn Bucket>,
        max_age: Duration::hours(1),
        aggregation_period: Duration::hours(3),
        grace_period: Duration::hours(1),
    };
    let mut intake_enqueuer =
        Enqueuer::new(Arc::clone(&harness.intake_publisher) as Arc<dyn TaskPublisher>, 4);
    let mut aggregation_enqueuer =
        Enqueuer::new(Arc::clone(&harness.aggregation_publisher) as Arc<dyn TaskPublisher>, 4);

    schedule_tasks(
        &config,
        &FixedClock(utc(2020, 10, 31, 21, 30)),
        &mut intake_enqueuer,
        &mut aggregation_enqueuer,
        &harness.metrics,
    )
    .await
    .expect("scheduling pass failed");

    assert_eq!(harness.aggregation_publisher.published().len(), 1);
}
