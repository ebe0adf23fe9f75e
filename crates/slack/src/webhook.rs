use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use intake_core::config::SlackConfig;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::blocks::MessageTemplate;

/// Body Slack returns for an accepted incoming-webhook post.
pub const WEBHOOK_ACK_BODY: &str = "ok";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("webhook client could not be built: {0}")]
    Client(String),
    #[error("webhook request timed out")]
    Timeout,
    #[error("webhook request failed: {0}")]
    Request(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("slack delivery failed after {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SlackConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    pub fn is_acknowledged(&self) -> bool {
        (200..300).contains(&self.status) && self.body.trim() == WEBHOOK_ACK_BODY
    }
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookResponse, TransportError>;
}

pub struct ReqwestWebhookTransport {
    client: reqwest::Client,
}

impl ReqwestWebhookTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| TransportError::Client(error.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for ReqwestWebhookTransport {
    async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookResponse, TransportError> {
        let response = self.client.post(url).json(payload).send().await.map_err(|error| {
            if error.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Request(error.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| TransportError::Request(error.to_string()))?;
        Ok(WebhookResponse { status, body })
    }
}

/// Posts a message to one incoming webhook, retrying with exponential backoff.
///
/// Only a 2xx response whose body is the literal `ok` counts as delivered;
/// anything else, including a 200 with another body, is retried.
pub struct WebhookClient {
    transport: Arc<dyn WebhookTransport>,
    url: SecretString,
    policy: RetryPolicy,
}

impl WebhookClient {
    pub fn new(transport: Arc<dyn WebhookTransport>, url: SecretString, policy: RetryPolicy) -> Self {
        Self { transport, url, policy }
    }

    /// `None` when no webhook is configured.
    pub fn from_config(config: &SlackConfig) -> Result<Option<Self>, TransportError> {
        let Some(url) = config.webhook_url.clone() else {
            return Ok(None);
        };
        let transport =
            ReqwestWebhookTransport::new(Duration::from_secs(config.timeout_secs.max(1)))?;
        Ok(Some(Self::new(Arc::new(transport), url, RetryPolicy::from_config(config))))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the number of attempts it took.
    pub async fn deliver(&self, message: &MessageTemplate) -> Result<u32, DeliveryError> {
        let payload = message.to_json();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.transport.post(self.url.expose_secret(), &payload).await {
                Ok(response) if response.is_acknowledged() => {
                    info!(event_name = "slack.webhook.delivered", attempt, "slack webhook acknowledged");
                    return Ok(attempt);
                }
                Ok(response) => {
                    last_error = format!(
                        "unexpected response status={} body={}",
                        response.status,
                        truncate(response.body.trim(), 120)
                    );
                }
                Err(error) => {
                    last_error = error.to_string();
                }
            }

            warn!(
                event_name = "slack.webhook.attempt_failed",
                attempt,
                max_attempts,
                error = %last_error,
                "slack webhook attempt failed"
            );

            if attempt < max_attempts {
                let delay = self.policy.backoff(attempt - 1);
                debug!(delay_ms = delay.as_millis() as u64, "backing off before next webhook attempt");
                tokio::time::sleep(delay).await;
            }
        }

        Err(DeliveryError::Exhausted { attempts: max_attempts, last_error })
    }
}

fn truncate(value: &str, max_chars: usize) -> &str {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}
