//! Cloud bucket backends and their selection by URL scheme.
//!
//! Buckets are addressed by URL-shaped strings:
//!
//! - `gs://<name>` for Google Cloud Storage
//! - `s3://<region>/<name>` for Amazon S3
//!
//! One capability trait ([`wfm_core::Bucket`]), two concrete
//! implementations, chosen at startup from the URL prefix.

pub mod gcs;
pub mod s3;

use std::sync::Arc;

use wfm_core::Bucket;

use crate::error::{Error, Result};

pub use gcs::GcsBucket;
pub use s3::S3Bucket;

/// A parsed bucket address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketUrl {
    /// A Google Cloud Storage bucket.
    Gcs {
        /// The bucket name.
        bucket: String,
    },
    /// An Amazon S3 bucket.
    S3 {
        /// The AWS region hosting the bucket.
        region: String,
        /// The bucket name.
        bucket: String,
    },
}

impl BucketUrl {
    /// Parses a `gs://<name>` or `s3://<region>/<name>` bucket URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for unknown schemes or missing
    /// components.
    pub fn parse(url: &str) -> Result<Self> {
        if let Some(bucket) = url.strip_prefix("gs://") {
            if bucket.is_empty() || bucket.contains('/') {
                return Err(Error::configuration(format!(
                    "invalid GCS bucket URL {url:?}: expected gs://<name>"
                )));
            }
            return Ok(Self::Gcs {
                bucket: bucket.to_string(),
            });
        }

        if let Some(rest) = url.strip_prefix("s3://") {
            if let Some((region, bucket)) = rest.split_once('/') {
                if !region.is_empty() && !bucket.is_empty() && !bucket.contains('/') {
                    return Ok(Self::S3 {
                        region: region.to_string(),
                        bucket: bucket.to_string(),
                    });
                }
            }
            return Err(Error::configuration(format!(
                "invalid S3 bucket URL {url:?}: expected s3://<region>/<name>"
            )));
        }

        Err(Error::configuration(format!(
            "unknown bucket URL scheme in {url:?}: expected gs:// or s3://"
        )))
    }
}

/// Constructs the bucket backend for `url`.
///
/// `identity` is the IAM role ARN to assume for S3 buckets; GCS buckets
/// use the ambient service-account credential. In dry-run mode marker
/// writes are traced but not executed.
///
/// # Errors
///
/// Returns an error when the URL is malformed or the backend's client
/// cannot be initialized.
pub async fn bucket_for_url(
    url: &str,
    identity: Option<&str>,
    dry_run: bool,
) -> Result<Arc<dyn Bucket>> {
    match BucketUrl::parse(url)? {
        BucketUrl::Gcs { bucket } => Ok(Arc::new(GcsBucket::new(&bucket, dry_run).await?)),
        BucketUrl::S3 { region, bucket } => {
            Ok(Arc::new(S3Bucket::new(&region, &bucket, identity, dry_run).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gcs_urls() {
        assert_eq!(
            BucketUrl::parse("gs://prio-ingestor").unwrap(),
            BucketUrl::Gcs {
                bucket: "prio-ingestor".into()
            }
        );
    }

    #[test]
    fn parses_s3_urls() {
        assert_eq!(
            BucketUrl::parse("s3://us-west-1/prio-peer-validations").unwrap(),
            BucketUrl::S3 {
                region: "us-west-1".into(),
                bucket: "prio-peer-validations".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(BucketUrl::parse("gs://").is_err());
        assert!(BucketUrl::parse("gs://name/extra").is_err());
        assert!(BucketUrl::parse("s3://us-west-1").is_err());
        assert!(BucketUrl::parse("s3:///bucket").is_err());
        assert!(BucketUrl::parse("s3://region/bucket/extra").is_err());
        assert!(BucketUrl::parse("file:///tmp/bucket").is_err());
        assert!(BucketUrl::parse("prio-ingestor").is_err());
    }
}
