//! Run gauges and their push to a Prometheus push gateway.
//!
//! The workflow manager is a short-lived batch process, so gauges
//! accumulate in-process and are pushed once on exit rather than
//! scraped. The recorder is injected through the scheduler so tests can
//! observe counts directly; when no push gateway is configured the
//! recorder still counts but nothing leaves the process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;

use crate::error::{Error, Result};

/// Metric names as constants for consistency.
pub mod names {
    /// Gauge: intake tasks successfully scheduled this run.
    pub const INTAKE_TASKS_SCHEDULED: &str = "workflow_manager_intake_tasks_scheduled";
    /// Gauge: intake tasks skipped because a marker was found.
    pub const INTAKE_TASKS_SKIPPED: &str =
        "workflow_manager_intake_tasks_skipped_due_to_marker";
    /// Gauge: aggregate tasks successfully scheduled this run.
    pub const AGGREGATION_TASKS_SCHEDULED: &str =
        "workflow_manager_aggregation_tasks_scheduled";
    /// Gauge: aggregate tasks skipped because a marker was found.
    pub const AGGREGATION_TASKS_SKIPPED: &str =
        "workflow_manager_aggregation_tasks_skipped_due_to_marker";
    /// Gauge: time of last successful run, seconds since the Unix epoch.
    pub const LAST_SUCCESS_SECONDS: &str = "workflow_manager_last_success_seconds";
    /// Gauge: time of last failed run, seconds since the Unix epoch.
    pub const LAST_FAILURE_SECONDS: &str = "workflow_manager_last_failure_seconds";
    /// Gauge: how long the run took, in seconds.
    pub const RUNTIME_SECONDS: &str = "workflow_manager_runtime_seconds";
}

/// Accumulates this run's gauges.
#[derive(Debug, Default)]
pub struct WorkflowMetrics {
    intake_tasks_scheduled: AtomicU64,
    intake_tasks_skipped: AtomicU64,
    aggregation_tasks_scheduled: AtomicU64,
    aggregation_tasks_skipped: AtomicU64,
    last_success_seconds: AtomicU64,
    last_failure_seconds: AtomicU64,
    runtime_seconds_bits: AtomicU64,
}

impl WorkflowMetrics {
    /// Creates a zeroed recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one successfully scheduled intake task.
    pub fn inc_intake_scheduled(&self) {
        self.intake_tasks_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one intake task skipped due to a marker.
    pub fn inc_intake_skipped(&self) {
        self.intake_tasks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one successfully scheduled aggregate task.
    pub fn inc_aggregation_scheduled(&self) {
        self.aggregation_tasks_scheduled
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records one aggregate task skipped due to a marker.
    pub fn inc_aggregation_skipped(&self) {
        self.aggregation_tasks_skipped
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Marks the run successful as of now.
    pub fn set_last_success_now(&self) {
        self.last_success_seconds
            .store(epoch_seconds(), Ordering::Relaxed);
    }

    /// Marks the run failed as of now.
    pub fn set_last_failure_now(&self) {
        self.last_failure_seconds
            .store(epoch_seconds(), Ordering::Relaxed);
    }

    /// Records the run's wall-clock duration.
    pub fn set_runtime(&self, runtime: Duration) {
        self.runtime_seconds_bits
            .store(runtime.as_secs_f64().to_bits(), Ordering::Relaxed);
    }

    /// Intake tasks scheduled so far.
    #[must_use]
    pub fn intake_tasks_scheduled(&self) -> u64 {
        self.intake_tasks_scheduled.load(Ordering::Relaxed)
    }

    /// Intake tasks skipped due to markers so far.
    #[must_use]
    pub fn intake_tasks_skipped(&self) -> u64 {
        self.intake_tasks_skipped.load(Ordering::Relaxed)
    }

    /// Aggregate tasks scheduled so far.
    #[must_use]
    pub fn aggregation_tasks_scheduled(&self) -> u64 {
        self.aggregation_tasks_scheduled.load(Ordering::Relaxed)
    }

    /// Aggregate tasks skipped due to markers so far.
    #[must_use]
    pub fn aggregation_tasks_skipped(&self) -> u64 {
        self.aggregation_tasks_skipped.load(Ordering::Relaxed)
    }

    /// Renders every gauge in the Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        render_gauge(
            &mut out,
            names::INTAKE_TASKS_SCHEDULED,
            &self.intake_tasks_scheduled().to_string(),
        );
        render_gauge(
            &mut out,
            names::INTAKE_TASKS_SKIPPED,
            &self.intake_tasks_skipped().to_string(),
        );
        render_gauge(
            &mut out,
            names::AGGREGATION_TASKS_SCHEDULED,
            &self.aggregation_tasks_scheduled().to_string(),
        );
        render_gauge(
            &mut out,
            names::AGGREGATION_TASKS_SKIPPED,
            &self.aggregation_tasks_skipped().to_string(),
        );
        render_gauge(
            &mut out,
            names::LAST_SUCCESS_SECONDS,
            &self.last_success_seconds.load(Ordering::Relaxed).to_string(),
        );
        render_gauge(
            &mut out,
            names::LAST_FAILURE_SECONDS,
            &self.last_failure_seconds.load(Ordering::Relaxed).to_string(),
        );
        let runtime = f64::from_bits(self.runtime_seconds_bits.load(Ordering::Relaxed));
        render_gauge(&mut out, names::RUNTIME_SECONDS, &format!("{runtime}"));
        out
    }
}

fn render_gauge(out: &mut String, name: &str, value: &str) {
    out.push_str("# TYPE ");
    out.push_str(name);
    out.push_str(" gauge\n");
    out.push_str(name);
    out.push(' ');
    out.push_str(value);
    out.push('\n');
}

fn epoch_seconds() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

/// Pushes rendered gauges to a Prometheus push gateway, grouped by
/// locality and ingestor so multiple deployments do not clobber each
/// other.
#[derive(Debug)]
pub struct PushGateway {
    endpoint: String,
    locality: String,
    ingestor: String,
    client: reqwest::Client,
}

impl PushGateway {
    /// Creates a pusher for `endpoint`, labelling pushed groups with the
    /// given locality (Kubernetes namespace) and ingestor label.
    #[must_use]
    pub fn new(endpoint: &str, locality: &str, ingestor: &str) -> Self {
        let endpoint = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("http://{endpoint}")
        };

        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            locality: locality.to_string(),
            ingestor: ingestor.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// The URL the metrics group is pushed to.
    #[must_use]
    pub fn push_url(&self) -> String {
        let mut url = format!("{}/metrics/job/workflow-manager", self.endpoint);
        if !self.locality.is_empty() {
            url.push_str(&format!("/locality/{}", self.locality));
        }
        if !self.ingestor.is_empty() {
            url.push_str(&format!("/ingestor/{}", self.ingestor));
        }
        url
    }

    /// Pushes the current gauge values.
    ///
    /// # Errors
    ///
    /// Returns an error when the gateway is unreachable or rejects the
    /// push.
    pub async fn push(&self, metrics: &WorkflowMetrics) -> Result<()> {
        let response = self
            .client
            .put(self.push_url())
            .header(reqwest::header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(metrics.render())
            .send()
            .await
            .map_err(|e| Error::dispatch(format!("pushing metrics failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::dispatch(format!(
                "push gateway rejected metrics: {status}"
            )));
        }

        Ok(())
    }
}
