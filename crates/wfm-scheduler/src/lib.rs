//! # wfm-scheduler
//!
//! The workflow manager of a privacy-preserving aggregation pipeline.
//!
//! Devices upload encrypted shares of telemetry values; two independent
//! data share processors each receive half of every packet. This crate
//! is the scheduler that discovers work in cloud object-storage buckets
//! and publishes **intake** and **aggregate** tasks to a task queue for
//! stateless workers to consume. It runs periodically, statelessly, with
//! at-most-once dispatch enforced by marker objects in a bucket.
//!
//! Components:
//!
//! - [`storage`]: GCS and S3 implementations of the bucket capability
//!   trait from `wfm-core`, selected by URL scheme
//! - [`enqueue`]: the bounded-parallelism task enqueuer over GCP Pub/Sub
//!   or AWS SNS
//! - [`task`]: the intake and aggregate task payloads and their marker
//!   names
//! - [`scheduler`]: the per-aggregation-ID scheduling pass
//! - [`metrics`]: run gauges pushed to a Prometheus push gateway on exit

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

mod aws;
pub mod enqueue;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod storage;
pub mod task;

pub use error::{Error, Result};
