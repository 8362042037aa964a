//! Shared AWS client configuration and web-identity federation.
//!
//! The workflow manager runs in a GKE cluster but must reach S3 buckets
//! and SNS topics owned by peers. When an IAM role ARN is configured,
//! credentials come from `AssumeRoleWithWebIdentity` using an identity
//! token minted by the cluster's metadata service with the role ARN as
//! audience. Without an identity, the SDK's default credential chain
//! applies.

use std::time::Duration;

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_sts::config::Credentials;

use crate::error::{Error, Result};

const METADATA_IDENTITY_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/identity";
const ROLE_SESSION_NAME: &str = "workflow-manager";

/// Builds an SDK configuration for `region`, assuming `identity` (an IAM
/// role ARN) via web-identity federation when one is provided.
pub(crate) async fn sdk_config(region: &str, identity: Option<&str>) -> Result<SdkConfig> {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .timeout_config(
            TimeoutConfig::builder()
                .operation_attempt_timeout(Duration::from_secs(30))
                .build(),
        )
        .retry_config(RetryConfig::standard().with_max_attempts(5));

    if let Some(role_arn) = identity {
        let credentials = assume_role_with_web_identity(region, role_arn).await?;
        loader = loader.credentials_provider(credentials);
    }

    Ok(loader.load().await)
}

/// Extracts the AWS account ID from an IAM role ARN like
/// `arn:aws:iam::123456789012:role/some-role`.
pub(crate) fn account_id_from_role_arn(role_arn: &str) -> Option<&str> {
    role_arn.split(':').nth(4).filter(|id| !id.is_empty())
}

async fn assume_role_with_web_identity(region: &str, role_arn: &str) -> Result<Credentials> {
    let token = metadata_identity_token(role_arn).await?;

    // AssumeRoleWithWebIdentity is unsigned, so the STS client needs no
    // credentials of its own.
    let sts_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .no_credentials()
        .load()
        .await;
    let sts = aws_sdk_sts::Client::new(&sts_config);

    let assumed = sts
        .assume_role_with_web_identity()
        .role_arn(role_arn)
        .role_session_name(ROLE_SESSION_NAME)
        .web_identity_token(token)
        .send()
        .await
        .map_err(|e| {
            Error::configuration(format!("failed to assume role {role_arn}: {e}"))
        })?;

    let credentials = assumed.credentials().ok_or_else(|| {
        Error::configuration(format!("assuming role {role_arn} returned no credentials"))
    })?;

    Ok(Credentials::new(
        credentials.access_key_id(),
        credentials.secret_access_key(),
        Some(credentials.session_token().to_string()),
        None,
        "web-identity-federation",
    ))
}

async fn metadata_identity_token(audience: &str) -> Result<String> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| Error::configuration(format!("failed to create HTTP client: {e}")))?;

    let response = client
        .get(METADATA_IDENTITY_URL)
        .header("Metadata-Flavor", "Google")
        .query(&[("audience", audience), ("format", "full")])
        .send()
        .await
        .map_err(|e| {
            Error::configuration(format!("failed to reach metadata service: {e}"))
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::configuration(format!(
            "metadata service refused identity token request: {status}"
        )));
    }

    response
        .text()
        .await
        .map_err(|e| Error::configuration(format!("failed to read identity token: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_id_parses_from_role_arn() {
        assert_eq!(
            account_id_from_role_arn("arn:aws:iam::123456789012:role/prio-intake"),
            Some("123456789012")
        );
        assert_eq!(account_id_from_role_arn("arn:aws:iam:::role/short"), None);
        assert_eq!(account_id_from_role_arn("not-an-arn"), None);
    }
}
