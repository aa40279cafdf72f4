use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;

use appointment_cell::services::{EventPublisher, PublishError, QueueEvent};

/// Forwards events to an external realtime relay over HTTP.
pub struct WebhookPublisher {
    client: Client,
    url: String,
}

impl WebhookPublisher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, event: &QueueEvent) -> Result<(), PublishError> {
        let channels: Vec<String> = event.audiences().iter().map(|a| a.channel_name()).collect();
        let payload = json!({
            "channels": channels,
            "event": event
        });

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PublishError::Transport(format!(
                "relay responded with {}",
                response.status()
            )));
        }

        debug!("Relayed {:?} for {} to {}", event.kind, event.appointment_id, self.url);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}
