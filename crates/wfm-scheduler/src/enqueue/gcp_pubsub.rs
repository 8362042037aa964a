//! GCP Pub/Sub task publisher.
//!
//! Publishes task messages to a Pub/Sub topic over the JSON REST API,
//! authenticating with the ambient service-account credential. The
//! broker's publish response carries a message ID per message; a publish
//! is only reported successful once that acknowledgement arrives.
//!
//! Topic auto-creation is optional and tolerates already-existing
//! topics, so several deployments can share a bootstrap flag.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use gcp_auth::TokenProvider;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::TaskPublisher;

const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";
const PUBSUB_ENDPOINT: &str = "https://pubsub.googleapis.com/v1";

/// Publishes tasks to a GCP Pub/Sub topic.
pub struct PubSubPublisher {
    project_id: String,
    topic: String,
    dry_run: bool,
    token_provider: Arc<dyn TokenProvider>,
    client: reqwest::Client,
}

impl std::fmt::Debug for PubSubPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PubSubPublisher")
            .field("project_id", &self.project_id)
            .field("topic", &self.topic)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

/// Pub/Sub publish request body.
#[derive(Debug, Serialize)]
struct PublishRequest {
    messages: Vec<PubSubMessage>,
}

/// A single Pub/Sub message with base64-encoded data.
#[derive(Debug, Serialize)]
struct PubSubMessage {
    data: String,
}

/// Pub/Sub publish response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

impl PubSubPublisher {
    /// Creates a publisher for `topic` in `project_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or GCP
    /// authentication cannot be initialized.
    pub async fn new(project_id: &str, topic: &str, dry_run: bool) -> Result<Self> {
        if project_id.is_empty() {
            return Err(Error::configuration("gcp-project-id cannot be empty"));
        }
        if topic.is_empty() {
            return Err(Error::configuration("pubsub topic cannot be empty"));
        }

        let token_provider = gcp_auth::provider()
            .await
            .map_err(|e| Error::configuration(format!("failed to initialize GCP auth: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            project_id: project_id.to_string(),
            topic: topic.to_string(),
            dry_run,
            token_provider,
            client,
        })
    }

    /// Creates the topic if it does not already exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the Pub/Sub API rejects the creation for
    /// any reason other than the topic already existing.
    pub async fn create_topic(&self) -> Result<()> {
        if self.dry_run {
            tracing::info!(topic = %self.topic, "dry run: skipping topic creation");
            return Ok(());
        }

        let access_token = self.access_token().await?;
        let response = self
            .client
            .put(self.topic_url())
            .bearer_auth(&access_token)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| Error::dispatch(format!("Pub/Sub topic creation failed: {e}")))?;

        let status = response.status();
        // ALREADY_EXISTS is fine: another deployment created the topic.
        if status.is_success() || status.as_u16() == 409 {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        Err(Error::dispatch(format!(
            "Pub/Sub topic creation error: {status} - {body}"
        )))
    }

    fn topic_url(&self) -> String {
        format!(
            "{PUBSUB_ENDPOINT}/projects/{}/topics/{}",
            self.project_id, self.topic
        )
    }

    async fn access_token(&self) -> Result<String> {
        let token = self
            .token_provider
            .token(&[PUBSUB_SCOPE])
            .await
            .map_err(|e| Error::dispatch(format!("failed to get GCP access token: {e}")))?;
        Ok(token.as_str().to_string())
    }
}

#[async_trait]
impl TaskPublisher for PubSubPublisher {
    async fn publish(&self, body: String) -> Result<()> {
        if self.dry_run {
            tracing::info!(topic = %self.topic, "dry run: not publishing task");
            return Ok(());
        }

        let request = PublishRequest {
            messages: vec![PubSubMessage {
                data: base64::engine::general_purpose::STANDARD.encode(body.as_bytes()),
            }],
        };

        let access_token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}:publish", self.topic_url()))
            .bearer_auth(&access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::dispatch(format!("Pub/Sub publish request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(Error::dispatch(format!(
                "Pub/Sub publish error: {status} - {body}"
            )));
        }

        let acked: PublishResponse = response
            .json()
            .await
            .map_err(|e| Error::dispatch(format!("failed to parse publish response: {e}")))?;
        if acked.message_ids.is_empty() {
            return Err(Error::dispatch(
                "Pub/Sub publish response carried no message IDs",
            ));
        }

        Ok(())
    }

    fn topic(&self) -> &str {
        &self.topic
    }
}
