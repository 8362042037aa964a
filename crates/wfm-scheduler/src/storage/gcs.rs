//! Google Cloud Storage bucket backend.
//!
//! Talks to the GCS JSON API over `reqwest`, authenticating with the
//! ambient service-account credential. Listings paginate with
//! `pageToken` at the API's 1000-object page size; interval filtering
//! happens client-side after parsing. Transient failures (5xx,
//! throttling, network) are retried on the standard backoff schedule;
//! a 404 on list yields an empty listing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::StatusCode;
use serde::Deserialize;

use wfm_core::error::{Error, Result};
use wfm_core::retry::Backoff;
use wfm_core::storage::{
    Bucket, TASK_MARKER_DIRECTORY, aggregate_marker_prefix, filter_keys_in_interval,
    intake_marker_prefix, strip_marker_directory,
};
use wfm_core::time::Interval;

const STORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
const STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
const PAGE_SIZE: &str = "1000";

/// A GCS bucket addressed as `gs://<name>`.
pub struct GcsBucket {
    bucket: String,
    dry_run: bool,
    token_provider: Arc<dyn TokenProvider>,
    client: reqwest::Client,
}

impl std::fmt::Debug for GcsBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsBucket")
            .field("bucket", &self.bucket)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// One page of an object listing.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    items: Vec<ObjectResource>,
    #[serde(default)]
    prefixes: Vec<String>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectResource {
    name: String,
}

/// The accumulated result of a full (all-pages) listing.
#[derive(Debug, Default)]
struct Listing {
    names: Vec<String>,
    prefixes: Vec<String>,
}

impl GcsBucket {
    /// Creates a backend for `bucket` using the ambient service-account
    /// credential.
    ///
    /// # Errors
    ///
    /// Returns an error when GCP authentication cannot be initialized.
    pub async fn new(bucket: &str, dry_run: bool) -> crate::error::Result<Self> {
        if bucket.is_empty() {
            return Err(crate::error::Error::configuration(
                "GCS bucket name cannot be empty",
            ));
        }

        let token_provider = gcp_auth::provider().await.map_err(|e| {
            crate::error::Error::configuration(format!("failed to initialize GCP auth: {e}"))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                crate::error::Error::configuration(format!("failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            bucket: bucket.to_string(),
            dry_run,
            token_provider,
            client,
        })
    }

    async fn access_token(&self) -> Result<String> {
        let token = self
            .token_provider
            .token(&[STORAGE_SCOPE])
            .await
            .map_err(|e| Error::storage(format!("failed to get GCP access token: {e}")))?;
        Ok(token.as_str().to_string())
    }

    /// Lists every object under `prefix`, concatenating pages until the
    /// continuation token runs out.
    async fn list_prefix(&self, prefix: &str, delimiter: Option<&str>) -> Result<Listing> {
        let mut listing = Listing::default();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .fetch_page_with_retry(prefix, delimiter, page_token.as_deref())
                .await?;
            listing
                .names
                .extend(page.items.into_iter().map(|object| object.name));
            listing.prefixes.extend(page.prefixes);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(listing)
    }

    async fn fetch_page_with_retry(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ListResponse> {
        let mut backoff = Backoff::new();
        loop {
            match self.fetch_page(prefix, delimiter, page_token).await {
                Ok(page) => return Ok(page),
                Err(err) if err.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            bucket = %self.bucket,
                            error = %err,
                            delay = ?delay,
                            "transient error listing bucket, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_page(
        &self,
        prefix: &str,
        delimiter: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ListResponse> {
        let access_token = self.access_token().await?;

        let mut query: Vec<(&str, &str)> =
            vec![("prefix", prefix), ("maxResults", PAGE_SIZE)];
        if let Some(delimiter) = delimiter {
            query.push(("delimiter", delimiter));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let response = self
            .client
            .get(format!(
                "{STORAGE_ENDPOINT}/storage/v1/b/{}/o",
                self.bucket
            ))
            .bearer_auth(&access_token)
            .query(&query)
            .send()
            .await
            .map_err(|e| transport_error(&self.bucket, "listing", e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // Missing bucket or prefix reads as an empty listing.
            return Ok(ListResponse::default());
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(status_error(&self.bucket, "listing", status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| Error::storage(format!("failed to parse GCS list response: {e}")))
    }

    async fn upload_marker(&self, key: &str) -> Result<()> {
        let access_token = self.access_token().await?;
        let response = self
            .client
            .post(format!(
                "{STORAGE_ENDPOINT}/upload/storage/v1/b/{}/o",
                self.bucket
            ))
            .bearer_auth(&access_token)
            .query(&[("uploadType", "media"), ("name", key)])
            .body(Vec::new())
            .send()
            .await
            .map_err(|e| transport_error(&self.bucket, "writing marker in", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(status_error(&self.bucket, "writing marker in", status, &body))
    }
}

fn transport_error(bucket: &str, operation: &str, err: reqwest::Error) -> Error {
    Error::storage_transient_with_source(format!("{operation} gs://{bucket} failed"), err)
}

fn status_error(bucket: &str, operation: &str, status: StatusCode, body: &str) -> Error {
    let message = format!("{operation} gs://{bucket} failed: {status} - {body}");
    if is_transient_status(status) {
        Error::storage_transient(message)
    } else {
        Error::storage(message)
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

#[async_trait]
impl Bucket for GcsBucket {
    async fn list_batch_files(
        &self,
        aggregation_id: &str,
        interval: Interval,
    ) -> Result<Vec<String>> {
        let listing = self.list_prefix(&format!("{aggregation_id}/"), None).await?;
        Ok(filter_keys_in_interval(listing.names, &interval))
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
            .names
            .iter()
            .map(|key| strip_marker_directory(key).to_string())
            .collect())
    }

    async fn list_aggregate_task_markers(&self, aggregation_id: &str) -> Result<Vec<String>> {
        let listing = self
            .list_prefix(&aggregate_marker_prefix(aggregation_id), None)
            .await?;
        Ok(listing
            .names
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

        let mut backoff = Backoff::new();
        loop {
            match self.upload_marker(&key).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::warn!(
                            bucket = %self.bucket,
                            error = %err,
                            delay = ?delay,
                            "transient error writing marker, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }
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
