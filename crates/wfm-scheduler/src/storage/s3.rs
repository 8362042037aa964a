//! Amazon S3 bucket backend.
//!
//! Lists objects with `ListObjectsV2`, following continuation tokens at
//! the API's 1000-key page size, and writes zero-length markers with
//! `PutObject`. Credentials come from web-identity federation when an
//! IAM role ARN is configured (see [`crate::aws`]); the SDK's standard
//! retry policy covers transient failures. A missing bucket on list
//! reads as an empty listing.

use async_trait::async_trait;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::primitives::ByteStream;

use wfm_core::error::{Error, Result};
use wfm_core::storage::{
    Bucket, TASK_MARKER_DIRECTORY, aggregate_marker_prefix, filter_keys_in_interval,
    intake_marker_prefix, strip_marker_directory,
};
use wfm_core::time::Interval;

/// An S3 bucket addressed as `s3://<region>/<name>`.
#[derive(Debug)]
pub struct S3Bucket {
    client: aws_sdk_s3::Client,
    bucket: String,
    dry_run: bool,
}

/// The accumulated result of a full (all-pages) listing.
#[derive(Debug, Default)]
struct Listing {
    keys: Vec<String>,
    prefixes: Vec<String>,
}

impl S3Bucket {
    /// Creates a backend for `bucket` in `region`, assuming `identity`
    /// (an IAM role ARN) when one is provided.
    ///
    /// # Errors
    ///
    /// Returns an error when the bucket name is empty or role assumption
    /// fails.
    pub async fn new(
        region: &str,
        bucket: &str,
        identity: Option<&str>,
        dry_run: bool,
    ) -> crate::error::Result<Self> {
        if bucket.is_empty() {
            return Err(crate::error::Error::configuration(
                "S3 bucket name cannot be empty",
            ));
        }

        let config = crate::aws::sdk_config(region, identity).await?;
        Ok(Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket: bucket.to_string(),
            dry_run,
        })
    }

    async fn list_prefix(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing> {
        let mut listing = Listing::default();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .max_keys(1000);
            if let Some(delimiter) = delimiter {
                request = request.delimiter(delimiter);
            }
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let page = match request.send().await {
                Ok(page) => page,
                Err(err)
                    if err
                        .as_service_error()
                        .is_some_and(ListObjectsV2Error::is_no_such_bucket) =>
                {
                    // Missing bucket reads as an empty listing.
                    return Ok(Listing::default());
                }
                Err(err) => {
                    return Err(Error::storage_with_source(
                        format!("listing s3 bucket {} failed", self.bucket),
                        err,
                    ));
                }
            };

            listing.keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );
            listing.prefixes.extend(
                page.common_prefixes()
                    .iter()
                    .filter_map(|common| common.prefix().map(String::from)),
            );

            continuation_token = page.next_continuation_token().map(String::from);
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(listing)
    }
}

#[async_trait]
impl Bucket for S3Bucket {
    async fn list_batch_files(
        &self,
        aggregation_id: &str,
        interval: Interval,
    ) -> Result<Vec<String>> {
        let listing = self.list_prefix(&format!("{aggregation_id}/"), None).await?;
        Ok(filter_keys_in_interval(listing.keys, &interval))
    }

    async fn list_intake_task_markers(
        &self,
        aggregation_id: &str,
        _interval: Interval,
    ) -> Result<Vec<String>> {
        let listing = self
            .list_prefix(&intake_marker_prefix(aggregation_id), None)
            .await?;
        Ok(listing
            .keys
            .iter()
            .map(|key| strip_marker_directory(key).to_string())
            .collect())
    }

    async fn list_aggregate_task_markers(&self, aggregation_id: &str) -> Result<Vec<String>> {
        let listing = self
            .list_prefix(&aggregate_marker_prefix(aggregation_id), None)
            .await?;
        Ok(listing
            .keys
            .iter()
            .map(|key| strip_marker_directory(key).to_string())
            .collect())
    }

    async fn write_task_marker(&self, marker: &str) -> Result<()> {
        let key = format!("{TASK_MARKER_DIRECTORY}/{marker}");
        if self.dry_run {
            tracing::info!(bucket = %self.bucket, key = %key, "dry run: skipping task marker write");
            return Ok(());
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from_static(&[]))
            .send()
            .await
            .map_err(|err| {
                Error::storage_with_source(
                    format!("writing marker {key} in s3 bucket {} failed", self.bucket),
                    err,
                )
            })?;

        Ok(())
    }

    async fn list_aggregation_ids(&self) -> Result<Vec<String>> {
        let listing = self.list_prefix("", Some("/")).await?;
        Ok(listing
            .prefixes
            .iter()
            .map(|prefix| prefix.trim_end_matches('/').to_string())
            .collect())
    }
}
