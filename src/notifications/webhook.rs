use crate::error::{AppError, Result};
use crate::models::PredictionRecord;
use crate::notifications::{NotificationEmitter, PredictionsUpdated};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

/// Posts each batch as a `predictions_updated` event to a webhook URL
#[derive(Clone)]
pub struct WebhookEmitter {
    client: Client,
    url: String,
    timeout_secs: u64,
}

impl WebhookEmitter {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout_secs,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post(&self, payload: &PredictionsUpdated) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header("User-Agent", "transit-risk-engine/0.3")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Timeout(format!(
                        "Webhook request timed out after {} seconds",
                        self.timeout_secs
                    ))
                } else {
                    AppError::Notification(format!("Webhook request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "Webhook returned non-success status {}: {}",
                status,
                if body.is_empty() { "No response body" } else { &body }
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationEmitter for WebhookEmitter {
    async fn emit(&self, batch: &[PredictionRecord]) -> Result<()> {
        let payload = PredictionsUpdated::from_batch(batch);
        self.post(&payload).await?;

        info!(url = %self.url, count = batch.len(), "Prediction webhook delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
