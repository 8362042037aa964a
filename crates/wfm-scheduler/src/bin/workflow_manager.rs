//! workflow-manager looks for batches to be processed in an ingestion
//! bucket and schedules intake-batch tasks for workers to process them.
//! It also looks for batches that have been intake'd on both data share
//! processors and schedules aggregate tasks.
//!
//! Runs periodically and statelessly; at-most-once dispatch is enforced
//! by marker objects in the own-validation bucket.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;

use wfm_core::observability::{LogFormat, init_logging};
use wfm_core::time::SystemClock;

use wfm_scheduler::enqueue::{Enqueuer, PubSubPublisher, SnsPublisher, TaskPublisher};
use wfm_scheduler::error::{Error, Result};
use wfm_scheduler::metrics::{PushGateway, WorkflowMetrics};
use wfm_scheduler::scheduler::{ScheduleTasksConfig, schedule_tasks};
use wfm_scheduler::storage::bucket_for_url;

/// Which task queue implementation to publish to.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum TaskQueueKind {
    /// GCP Pub/Sub topics.
    GcpPubsub,
    /// AWS SNS topics.
    AwsSns,
}

/// Schedules intake and aggregate tasks from bucket contents.
#[derive(Debug, Parser)]
#[command(name = "workflow-manager", version, about)]
struct Options {
    /// Kubernetes namespace this deployment runs in (metrics label).
    #[arg(long, default_value = "")]
    k8s_namespace: String,

    /// Label of the ingestion server (metrics label).
    #[arg(long, default_value = "")]
    ingestor_label: String,

    /// Whether this set of servers is "first", aka the PHA servers.
    #[arg(long)]
    is_first: bool,

    /// Max age for intake batches to be worth processing.
    #[arg(long, default_value = "1h")]
    intake_max_age: humantime::Duration,

    /// How much time each aggregation covers.
    #[arg(long, default_value = "3h")]
    aggregation_period: humantime::Duration,

    /// How long after the end of an aggregation timeslice to wait before
    /// running the aggregation.
    #[arg(long, default_value = "1h")]
    grace_period: humantime::Duration,

    /// Bucket for input from the ingestor (gs:// or s3://).
    #[arg(long)]
    ingestor_input: String,

    /// Identity to use with the ingestor bucket (required for S3).
    #[arg(long)]
    ingestor_identity: Option<String>,

    /// Bucket for validation batches from this processor (gs:// or s3://).
    #[arg(long)]
    own_validation_input: String,

    /// Identity to use with the own-validation bucket (required for S3).
    #[arg(long)]
    own_validation_identity: Option<String>,

    /// Bucket for validation batches from the peer processor (gs:// or
    /// s3://).
    #[arg(long)]
    peer_validation_input: String,

    /// Identity to use with the peer-validation bucket (required for S3).
    #[arg(long)]
    peer_validation_identity: Option<String>,

    /// Which task queue kind to use.
    #[arg(long, value_enum)]
    task_queue_kind: TaskQueueKind,

    /// Topic to which intake-batch tasks are published.
    #[arg(long)]
    intake_tasks_topic: String,

    /// Topic to which aggregate tasks are published.
    #[arg(long)]
    aggregate_tasks_topic: String,

    /// GCP project ID used for Pub/Sub.
    #[arg(long)]
    gcp_project_id: Option<String>,

    /// Create the Pub/Sub topics used for intake and aggregate tasks.
    #[arg(long)]
    gcp_pubsub_create_topics: bool,

    /// AWS region in which to publish to the SNS topics.
    #[arg(long)]
    aws_sns_region: Option<String>,

    /// AWS IAM ARN of the role assumed to publish to the SNS topics.
    #[arg(long)]
    aws_sns_identity: Option<String>,

    /// Prometheus push gateway. If unset, metrics are not pushed.
    #[arg(long)]
    push_gateway: Option<String>,

    /// Trace operations with side effects instead of performing them.
    #[arg(long)]
    dry_run: bool,

    /// Max number of workers used to enqueue tasks.
    #[arg(long, default_value_t = wfm_scheduler::enqueue::DEFAULT_MAX_ENQUEUE_WORKERS)]
    max_enqueue_workers: usize,
}

fn log_format_from_env() -> LogFormat {
    match std::env::var("WORKFLOW_MANAGER_LOG_FORMAT") {
        Ok(value) if value.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
        _ => LogFormat::Json,
    }
}

fn chrono_duration(flag: &str, value: humantime::Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(*value)
        .map_err(|_| Error::configuration(format!("--{flag} is out of range")))
}

async fn build_enqueuer(
    options: &Options,
    topic: &str,
) -> Result<Enqueuer> {
    let publisher: Arc<dyn TaskPublisher> = match options.task_queue_kind {
        TaskQueueKind::GcpPubsub => {
            let project_id = options.gcp_project_id.as_deref().ok_or_else(|| {
                Error::configuration(
                    "--gcp-project-id is required for --task-queue-kind=gcp-pubsub",
                )
            })?;

            let publisher = PubSubPublisher::new(project_id, topic, options.dry_run).await?;
            if options.gcp_pubsub_create_topics {
                publisher.create_topic().await?;
            }
            Arc::new(publisher)
        }
        TaskQueueKind::AwsSns => {
            let region = options.aws_sns_region.as_deref().ok_or_else(|| {
                Error::configuration("--aws-sns-region is required for --task-queue-kind=aws-sns")
            })?;

            Arc::new(
                SnsPublisher::new(
                    region,
                    options.aws_sns_identity.as_deref(),
                    topic,
                    options.dry_run,
                )
                .await?,
            )
        }
    };

    Ok(Enqueuer::new(publisher, options.max_enqueue_workers))
}

async fn run(options: &Options, metrics: &Arc<WorkflowMetrics>) -> Result<()> {
    let max_age = chrono_duration("intake-max-age", options.intake_max_age)?;
    let aggregation_period = chrono_duration("aggregation-period", options.aggregation_period)?;
    let grace_period = chrono_duration("grace-period", options.grace_period)?;
    if aggregation_period <= chrono::Duration::zero() {
        return Err(Error::configuration("--aggregation-period must be positive"));
    }

    if options.intake_tasks_topic.is_empty() || options.aggregate_tasks_topic.is_empty() {
        return Err(Error::configuration(
            "--intake-tasks-topic and --aggregate-tasks-topic are required",
        ));
    }

    let intake_bucket = bucket_for_url(
        &options.ingestor_input,
        options.ingestor_identity.as_deref(),
        options.dry_run,
    )
    .await?;
    let own_validation_bucket = bucket_for_url(
        &options.own_validation_input,
        options.own_validation_identity.as_deref(),
        options.dry_run,
    )
    .await?;
    let peer_validation_bucket = bucket_for_url(
        &options.peer_validation_input,
        options.peer_validation_identity.as_deref(),
        options.dry_run,
    )
    .await?;

    let mut intake_enqueuer = build_enqueuer(options, &options.intake_tasks_topic).await?;
    let mut aggregation_enqueuer =
        build_enqueuer(options, &options.aggregate_tasks_topic).await?;

    let aggregation_ids = intake_bucket.list_aggregation_ids().await.map_err(|err| {
        Error::configuration(format!(
            "unable to discover aggregation IDs from ingestion bucket: {err}"
        ))
    })?;

    let clock = SystemClock;
    for aggregation_id in aggregation_ids {
        let config = ScheduleTasksConfig {
            aggregation_id: aggregation_id.clone(),
            is_first: options.is_first,
            intake_bucket: Arc::clone(&intake_bucket),
            own_validation_bucket: Arc::clone(&own_validation_bucket),
            peer_validation_bucket: Arc::clone(&peer_validation_bucket),
            max_age,
            aggregation_period,
            grace_period,
        };

        // An error for one aggregation ID must not stop the others.
        if let Err(err) = schedule_tasks(
            &config,
            &clock,
            &mut intake_enqueuer,
            &mut aggregation_enqueuer,
            metrics,
        )
        .await
        {
            tracing::error!(
                aggregation_id = %aggregation_id,
                error = %err,
                "failed to schedule tasks"
            );
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging(log_format_from_env());
    let start = Instant::now();
    let options = Options::parse();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        args = std::env::args().skip(1).collect::<Vec<_>>().join(","),
        "starting workflow-manager"
    );

    let metrics = Arc::new(WorkflowMetrics::new());
    let pusher = options
        .push_gateway
        .as_deref()
        .map(|gateway| PushGateway::new(gateway, &options.k8s_namespace, &options.ingestor_label));

    let exit = match run(&options, &metrics).await {
        Ok(()) => {
            metrics.set_last_success_now();
            metrics.set_runtime(start.elapsed());
            tracing::info!("done");
            ExitCode::SUCCESS
        }
        Err(err) => {
            metrics.set_last_failure_now();
            tracing::error!(error = %err, "workflow-manager failed");
            ExitCode::FAILURE
        }
    };

    if let Some(pusher) = pusher {
        if let Err(err) = pusher.push(&metrics).await {
            tracing::error!(error = %err, "error pushing metrics to prometheus");
        }
    }

    exit
}
