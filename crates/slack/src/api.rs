use std::time::Duration;

use async_trait::async_trait;
use intake_core::config::SlackConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::blocks::MessageTemplate;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("slack api client could not be built: {0}")]
    Client(String),
    #[error("slack api request failed: {0}")]
    Request(String),
    #[error("slack api returned status {0}")]
    Status(u16),
    #[error("slack api rejected the call: {0}")]
    Rejected(String),
    #[error("slack api response was missing `ts`")]
    MissingTs,
}

/// Bot-token Web API surface used for request threads.
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// Posts a message and returns its `ts`, which doubles as the thread id.
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<String, ApiError>;
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    ts: Option<String>,
    error: Option<String>,
}

pub struct HttpSlackApi {
    client: reqwest::Client,
    base_url: String,
    bot_token: SecretString,
}

impl HttpSlackApi {
    pub fn new(
        base_url: impl Into<String>,
        bot_token: SecretString,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ApiError::Client(error.to_string()))?;
        Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string(), bot_token })
    }

    /// `None` when no bot token is configured.
    pub fn from_config(config: &SlackConfig) -> Result<Option<Self>, ApiError> {
        let Some(token) = config.bot_token.clone() else {
            return Ok(None);
        };
        Self::new(&config.api_base_url, token, Duration::from_secs(config.timeout_secs.max(1)))
            .map(Some)
    }
}

#[async_trait]
impl SlackApi for HttpSlackApi {
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        message: &MessageTemplate,
    ) -> Result<String, ApiError> {
        let mut body = message.to_json();
        body["channel"] = serde_json::Value::String(channel.to_string());
        if let Some(thread_ts) = thread_ts {
            body["thread_ts"] = serde_json::Value::String(thread_ts.to_string());
        }

        let response = self
            .client
            .post(format!("{}/chat.postMessage", self.base_url))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|error| ApiError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status(status.as_u16()));
        }

        let parsed = response
            .json::<PostMessageResponse>()
            .await
            .map_err(|error| ApiError::Request(error.to_string()))?;
        if !parsed.ok {
            return Err(ApiError::Rejected(parsed.error.unwrap_or_else(|| "unknown_error".to_string())));
        }

        let ts = parsed.ts.ok_or(ApiError::MissingTs)?;
        debug!(event_name = "slack.api.posted", channel, threaded = thread_ts.is_some(), "posted slack message");
        Ok(ts)
    }
}
