//! # wfm-core
//!
//! Shared primitives for the workflow manager of a privacy-preserving
//! aggregation pipeline.
//!
//! This crate provides the pieces every other component builds on:
//!
//! - **Batch paths**: parsing and formatting of batch object keys, and
//!   assembly of object fragments into complete, time-ordered batches
//! - **Time windows**: an injectable clock, half-open intervals, and the
//!   epoch-aligned aggregation window computation
//! - **Bucket abstraction**: the capability trait for cloud object-storage
//!   buckets, with an in-memory implementation for tests
//! - **Retry policy**: the backoff schedule applied to transient storage
//!   failures
//! - **Error types**: shared error definitions and result types
//!
//! Cloud-specific bucket and task-queue backends live in `wfm-scheduler`;
//! this crate stays free of any cloud SDK so its types can be exercised
//! entirely in memory.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod batch_path;
pub mod error;
pub mod observability;
pub mod retry;
pub mod storage;
pub mod time;

pub use batch_path::{BatchList, BatchPath, ready_batches};
pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging};
pub use retry::Backoff;
pub use storage::{Bucket, MemoryBucket, TASK_MARKER_DIRECTORY};
pub use time::{Clock, FixedClock, Interval, SystemClock};
