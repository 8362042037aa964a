//! Task payloads published to the task queue, and their marker names.
//!
//! A task's marker is the name of the zero-length bucket object whose
//! presence asserts "this task was previously enqueued; do not enqueue
//! again". Markers are written only after the broker has acknowledged
//! the publish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wfm_core::time::{fmt_rfc3339, slash_timestamp};

/// A unit of work that can be published to the task queue.
pub trait Task: Serialize + Send + Sync + 'static {
    /// The marker name for this task, without the `task-markers/`
    /// directory prefix.
    fn marker(&self) -> String;

    /// A short label for log lines.
    fn kind(&self) -> &'static str;
}

/// Instructs a worker to validate one uploaded batch and emit a
/// validation share.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeTask {
    /// The aggregation the batch belongs to.
    #[serde(rename = "aggregation-id")]
    pub aggregation_id: String,
    /// The batch's UUID.
    #[serde(rename = "batch-id")]
    pub batch_id: String,
    /// The batch's wall-clock time.
    #[serde(rename = "date", with = "slash_timestamp")]
    pub date: DateTime<Utc>,
}

impl Task for IntakeTask {
    fn marker(&self) -> String {
        format!("intake-{}-{}", self.aggregation_id, self.batch_id)
    }

    fn kind(&self) -> &'static str {
        "intake"
    }
}

/// One batch reference inside an aggregate task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskBatch {
    /// The batch's UUID.
    pub id: String,
    /// The batch's wall-clock time.
    #[serde(with = "slash_timestamp")]
    pub time: DateTime<Utc>,
}

/// Instructs a worker to combine matched validation shares within a
/// time window into a sum part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationTask {
    /// The aggregation being summed.
    #[serde(rename = "aggregation-id")]
    pub aggregation_id: String,
    /// Inclusive start of the aggregation window.
    #[serde(rename = "aggregation-start", with = "slash_timestamp")]
    pub aggregation_start: DateTime<Utc>,
    /// Exclusive end of the aggregation window.
    #[serde(rename = "aggregation-end", with = "slash_timestamp")]
    pub aggregation_end: DateTime<Utc>,
    /// The batches whose validations exist on both processors, in peer
    /// listing order.
    pub batches: Vec<TaskBatch>,
}

impl Task for AggregationTask {
    fn marker(&self) -> String {
        format!(
            "aggregate-{}-{}-{}",
            self.aggregation_id,
            fmt_rfc3339(self.aggregation_start),
            fmt_rfc3339(self.aggregation_end),
        )
    }

    fn kind(&self) -> &'static str {
        "aggregate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn intake_task_wire_format() {
        let task = IntakeTask {
            aggregation_id: "kittens-seen".into(),
            batch_id: "b8a5579a-f984-460a-a42d-2813cbf57771".into(),
            date: utc(2020, 10, 31, 20, 29),
        };

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "aggregation-id": "kittens-seen",
                "batch-id": "b8a5579a-f984-460a-a42d-2813cbf57771",
                "date": "2020/10/31/20/29",
            })
        );
    }

    #[test]
    fn intake_task_marker() {
        let task = IntakeTask {
            aggregation_id: "kittens-seen".into(),
            batch_id: "b8a5579a-f984-460a-a42d-2813cbf57771".into(),
            date: utc(2020, 10, 31, 20, 29),
        };
        assert_eq!(
            task.marker(),
            "intake-kittens-seen-b8a5579a-f984-460a-a42d-2813cbf57771"
        );
    }

    #[test]
    fn aggregation_task_wire_format() {
        let task = AggregationTask {
            aggregation_id: "kittens-seen".into(),
            aggregation_start: utc(2020, 10, 31, 18, 0),
            aggregation_end: utc(2020, 10, 31, 21, 0),
            batches: vec![TaskBatch {
                id: "b8a5579a-f984-460a-a42d-2813cbf57771".into(),
                time: utc(2020, 10, 31, 20, 29),
            }],
        };

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "aggregation-id": "kittens-seen",
                "aggregation-start": "2020/10/31/18/00",
                "aggregation-end": "2020/10/31/21/00",
                "batches": [
                    {"id": "b8a5579a-f984-460a-a42d-2813cbf57771", "time": "2020/10/31/20/29"},
                ],
            })
        );
    }

    #[test]
    fn aggregation_task_marker_uses_rfc3339_endpoints() {
        let task = AggregationTask {
            aggregation_id: "kittens-seen".into(),
            aggregation_start: utc(2020, 10, 31, 18, 0),
            aggregation_end: utc(2020, 10, 31, 21, 0),
            batches: vec![],
        };
        assert_eq!(
            task.marker(),
            "aggregate-kittens-seen-2020-10-31T18:00:00Z-2020-10-31T21:00:00Z"
        );
    }
}
