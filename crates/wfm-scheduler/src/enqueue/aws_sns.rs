//! AWS SNS task publisher.
//!
//! The topic ARN is derived from the configured region, the account of
//! the assumed role, and the topic name. A publish is reported
//! successful once SNS returns a message ID.

use async_trait::async_trait;

use crate::aws;
use crate::error::{Error, Result};

use super::TaskPublisher;

/// Publishes tasks to an AWS SNS topic.
#[derive(Debug)]
pub struct SnsPublisher {
    client: aws_sdk_sns::Client,
    topic: String,
    topic_arn: String,
    dry_run: bool,
}

impl SnsPublisher {
    /// Creates a publisher for `topic` in `region`, assuming `identity`
    /// (an IAM role ARN) to publish.
    ///
    /// # Errors
    ///
    /// Returns an error when the region or topic is empty, when role
    /// assumption fails, or when the topic owner's account cannot be
    /// determined.
    pub async fn new(
        region: &str,
        identity: Option<&str>,
        topic: &str,
        dry_run: bool,
    ) -> Result<Self> {
        if region.is_empty() {
            return Err(Error::configuration("aws-sns-region cannot be empty"));
        }
        if topic.is_empty() {
            return Err(Error::configuration("sns topic cannot be empty"));
        }

        let config = aws::sdk_config(region, identity).await?;
        let client = aws_sdk_sns::Client::new(&config);

        let account = match identity.and_then(aws::account_id_from_role_arn) {
            Some(account) => account.to_string(),
            None => caller_account(&config).await?,
        };
        let topic_arn = format!("arn:aws:sns:{region}:{account}:{topic}");

        Ok(Self {
            client,
            topic: topic.to_string(),
            topic_arn,
            dry_run,
        })
    }
}

async fn caller_account(config: &aws_config::SdkConfig) -> Result<String> {
    let sts = aws_sdk_sts::Client::new(config);
    let identity = sts
        .get_caller_identity()
        .send()
        .await
        .map_err(|e| Error::configuration(format!("failed to resolve AWS account: {e}")))?;
    identity
        .account()
        .map(String::from)
        .ok_or_else(|| Error::configuration("caller identity carried no account ID"))
}

#[async_trait]
impl TaskPublisher for SnsPublisher {
    async fn publish(&self, body: String) -> Result<()> {
        if self.dry_run {
            tracing::info!(topic = %self.topic, "dry run: not publishing task");
            return Ok(());
        }

        let published = self
            .client
            .publish()
            .topic_arn(&self.topic_arn)
            .message(body)
            .send()
            .await
            .map_err(|e| Error::dispatch(format!("SNS publish failed: {e}")))?;

        if published.message_id().is_none() {
            return Err(Error::dispatch("SNS publish returned no message ID"));
        }

        Ok(())
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
