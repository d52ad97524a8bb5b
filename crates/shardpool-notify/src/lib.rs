//! Best-effort notifications for state-changing events.
//!
//! Delivery failures are the caller's to log; they never propagate
//! as controller failures.

use std::time::Duration;

use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Sends operator-facing messages.
pub trait Notifier {
    fn send(
        &self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), NotifyError>> + Send;
}

/// Posts messages to a Slack-compatible incoming webhook.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: &str) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            webhook_url: webhook_url.to_string(),
        })
    }
}

impl Notifier for SlackNotifier {
    async fn send(&self, text: &str) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": text }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(len = text.len(), "notification delivered");
        Ok(())
    }
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    async fn send(&self, _text: &str) -> Result<(), NotifyError> {
        Ok(())
    }
}
