//! The bucket capability trait and its in-memory test double.
//!
//! A bucket holds batch objects written by external producers plus the
//! scheduler's own task markers. The scheduler only ever lists batch
//! objects, lists markers, and creates markers; batches themselves are
//! read-only from its point of view.
//!
//! Cloud backends (GCS, S3) live in `wfm-scheduler`; they implement this
//! trait over their respective listing APIs and share the client-side
//! interval filtering defined here.

use std::collections::BTreeSet;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::batch_path::key_time;
use crate::error::{Error, Result};
use crate::time::Interval;

/// The bucket directory under which task markers are stored.
pub const TASK_MARKER_DIRECTORY: &str = "task-markers";

/// Capabilities the scheduler needs from a cloud object-storage bucket.
///
/// Marker names are exchanged without the `task-markers/` directory
/// prefix: `write_task_marker("intake-agg-uuid")` creates the object
/// `task-markers/intake-agg-uuid`, and the listing operations return
/// names in the same directory-free form.
#[async_trait]
pub trait Bucket: Send + Sync {
    /// Lists batch object keys for `aggregation_id` whose embedded
    /// timestamps fall within `interval`.
    ///
    /// Listing is by prefix; interval filtering happens client-side
    /// because object stores do not index by timestamp. Objects whose
    /// names cannot be parsed are skipped, never failing the listing.
    async fn list_batch_files(
        &self,
        aggregation_id: &str,
        interval: Interval,
    ) -> Result<Vec<String>>;

    /// Lists intake task markers for `aggregation_id`.
    ///
    /// The interval is accepted for interface symmetry with
    /// [`list_batch_files`](Bucket::list_batch_files) but not applied:
    /// intake marker names embed batch IDs, not parseable timestamps.
    async fn list_intake_task_markers(
        &self,
        aggregation_id: &str,
        interval: Interval,
    ) -> Result<Vec<String>>;

    /// Lists aggregate task markers for `aggregation_id`.
    async fn list_aggregate_task_markers(&self, aggregation_id: &str) -> Result<Vec<String>>;

    /// Creates the zero-length object `task-markers/<marker>`.
    ///
    /// Idempotent: re-creating an existing marker is success. In dry-run
    /// mode the write is traced but not executed.
    async fn write_task_marker(&self, marker: &str) -> Result<()>;

    /// Enumerates the distinct top-level prefixes of the bucket, which
    /// by convention are the aggregation IDs.
    async fn list_aggregation_ids(&self) -> Result<Vec<String>>;
}

/// Keeps only the keys whose embedded timestamps fall within `interval`,
/// skipping (and logging) keys that do not parse.
#[must_use]
pub fn filter_keys_in_interval(keys: Vec<String>, interval: &Interval) -> Vec<String> {
    keys.into_iter()
        .filter(|key| match key_time(key) {
            Ok(time) => interval.contains(time),
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "skipping unparseable object key");
                false
            }
        })
        .collect()
}

/// Returns the full marker listing prefix for intake tasks of an
/// aggregation ID, including the marker directory.
#[must_use]
pub fn intake_marker_prefix(aggregation_id: &str) -> String {
    format!("{TASK_MARKER_DIRECTORY}/intake-{aggregation_id}-")
}

/// Returns the full marker listing prefix for aggregate tasks of an
/// aggregation ID, including the marker directory.
#[must_use]
pub fn aggregate_marker_prefix(aggregation_id: &str) -> String {
    format!("{TASK_MARKER_DIRECTORY}/aggregate-{aggregation_id}-")
}

/// Strips the marker directory from a listed key, yielding the bare
/// marker name the scheduler compares against.
#[must_use]
pub fn strip_marker_directory(key: &str) -> &str {
    key.strip_prefix(TASK_MARKER_DIRECTORY)
        .and_then(|rest| rest.strip_prefix('/'))
        .unwrap_or(key)
}

/// In-memory bucket for tests.
///
/// Stores object keys only; all objects are zero-length as far as the
/// scheduler is concerned. Thread-safe via `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryBucket {
    keys: RwLock<BTreeSet<String>>,
}

impl MemoryBucket {
    /// Creates a new empty bucket.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a bucket pre-populated with the given keys.
    pub fn with_keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let bucket = Self::new();
        for key in keys {
            bucket.insert(key);
        }
        bucket
    }

    /// Adds an object key.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn insert(&self, key: impl Into<String>) {
        self.keys
            .write()
            .expect("memory bucket lock poisoned")
            .insert(key.into());
    }

    /// Returns true if the bucket holds `key`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys
            .read()
            .expect("memory bucket lock poisoned")
            .contains(key)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = self
            .keys
            .read()
            .map_err(|_| Error::storage("memory bucket lock poisoned"))?;
        Ok(keys
            .iter()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    async fn list_batch_files(
        &self,
        aggregation_id: &str,
        interval: Interval,
    ) -> Result<Vec<String>> {
        let keys = self.keys_with_prefix(&format!("{aggregation_id}/"))?;
        Ok(filter_keys_in_interval(keys, &interval))
    }

    async fn list_intake_task_markers(
        &self,
        aggregation_id: &str,
        _interval: Interval,
    ) -> Result<Vec<String>> {
        let keys = self.keys_with_prefix(&intake_marker_prefix(aggregation_id))?;
        Ok(keys
            .iter()
            .map(|key| strip_marker_directory(key).to_string())
            .collect())
    }

    async fn list_aggregate_task_markers(&self, aggregation_id: &str) -> Result<Vec<String>> {
        let keys = self.keys_with_prefix(&aggregate_marker_prefix(aggregation_id))?;
        Ok(keys
            .iter()
            .map(|key| strip_marker_directory(key).to_string())
            .collect())
    }

    async fn write_task_marker(&self, marker: &str) -> Result<()> {
        self.keys
            .write()
            .map_err(|_| Error::storage("memory bucket lock poisoned"))?
            .insert(format!("{TASK_MARKER_DIRECTORY}/{marker}"));
        Ok(())
    }

    async fn list_aggregation_ids(&self) -> Result<Vec<String>> {
        let keys = self
            .keys
            .read()
            .map_err(|_| Error::storage("memory bucket lock poisoned"))?;
        let mut ids: Vec<String> = keys
            .iter()
            .filter_map(|key| key.split_once('/').map(|(first, _)| first))
            .filter(|first| *first != TASK_MARKER_DIRECTORY)
            .map(String::from)
            .collect();
        ids.dedup();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedClock;
    use crate::time::intake_interval;
    use chrono::{Duration, TimeZone, Utc};

    fn test_interval() -> Interval {
        let clock = FixedClock(Utc.with_ymd_and_hms(2020, 10, 31, 20, 45, 0).unwrap());
        intake_interval(&clock, Duration::hours(1))
    }

    #[tokio::test]
    async fn list_batch_files_filters_by_prefix_and_interval() {
        let bucket = MemoryBucket::with_keys([
            "kittens-seen/2020/10/31/20/29/uuid-a.batch",
            "kittens-seen/2020/10/31/12/00/uuid-b.batch",
            "puppies-seen/2020/10/31/20/29/uuid-c.batch",
        ]);

        let keys = bucket
            .list_batch_files("kittens-seen", test_interval())
            .await
            .unwrap();
        assert_eq!(keys, vec!["kittens-seen/2020/10/31/20/29/uuid-a.batch"]);
    }

    #[tokio::test]
    async fn list_batch_files_skips_unparseable_keys() {
        let bucket = MemoryBucket::with_keys([
            "kittens-seen/2020/10/31/20/29/uuid-a.batch",
            "kittens-seen/not-a-date",
        ]);

        let keys = bucket
            .list_batch_files("kittens-seen", test_interval())
            .await
            .unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn marker_round_trip_strips_directory() {
        let bucket = MemoryBucket::new();
        bucket
            .write_task_marker("intake-kittens-seen-uuid-a")
            .await
            .unwrap();

        assert!(bucket.contains("task-markers/intake-kittens-seen-uuid-a"));
        let markers = bucket
            .list_intake_task_markers("kittens-seen", test_interval())
            .await
            .unwrap();
        assert_eq!(markers, vec!["intake-kittens-seen-uuid-a"]);
    }

    #[tokio::test]
    async fn marker_write_is_idempotent() {
        let bucket = MemoryBucket::new();
        bucket.write_task_marker("aggregate-a-x-y").await.unwrap();
        bucket.write_task_marker("aggregate-a-x-y").await.unwrap();
        let markers = bucket.list_aggregate_task_markers("a").await.unwrap();
        assert_eq!(markers.len(), 1);
    }

    #[tokio::test]
    async fn marker_listings_are_scoped_per_aggregation_id() {
        let bucket = MemoryBucket::new();
        bucket.write_task_marker("intake-a-uuid-1").await.unwrap();
        bucket.write_task_marker("intake-b-uuid-2").await.unwrap();
        bucket.write_task_marker("aggregate-a-x-y").await.unwrap();

        let intake = bucket
            .list_intake_task_markers("a", test_interval())
            .await
            .unwrap();
        assert_eq!(intake, vec!["intake-a-uuid-1"]);
        let aggregate = bucket.list_aggregate_task_markers("a").await.unwrap();
        assert_eq!(aggregate, vec!["aggregate-a-x-y"]);
    }

    #[tokio::test]
    async fn aggregation_ids_are_distinct_top_level_prefixes() {
        let bucket = MemoryBucket::with_keys([
            "kittens-seen/2020/10/31/20/29/uuid-a.batch",
            "kittens-seen/2020/10/31/20/29/uuid-a.batch.avro",
            "puppies-seen/2020/10/31/20/29/uuid-b.batch",
            "task-markers/intake-kittens-seen-uuid-a",
        ]);

        let ids = bucket.list_aggregation_ids().await.unwrap();
        assert_eq!(ids, vec!["kittens-seen", "puppies-seen"]);
    }
}
