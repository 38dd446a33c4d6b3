// Telegram Bot API transport: send to the configured chat, long-poll for commands.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::TelegramConfig;
use crate::error::DeliveryError;
use crate::retry::RetryPolicy;

const API_BASE: &str = "https://api.telegram.org";
/// Headroom over the long-poll timeout before the HTTP request itself gives up.
const POLL_GRACE: Duration = Duration::from_secs(10);
const SEND_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub update_id: i64,
    /// None for update kinds without a text message.
    pub message: Option<InboundMessage>,
}

/// Outbound text plus inbound update retrieval.
pub trait Messenger: Send + Sync {
    fn send(&self, text: &str) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Updates with id >= `offset`, waiting up to the configured long-poll timeout.
    fn poll(
        &self,
        offset: Option<i64>,
    ) -> impl Future<Output = Result<Vec<Update>, DeliveryError>> + Send;
}

#[derive(Debug, Deserialize)]
struct ApiReply<T> {
    ok: bool,
    result: Option<T>,
    error_code: Option<u16>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawUpdate {
    update_id: i64,
    message: Option<RawMessage>,
    edited_message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    chat: RawChat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawChat {
    id: i64,
}

impl From<RawUpdate> for Update {
    fn from(raw: RawUpdate) -> Self {
        let message = raw
            .message
            .or(raw.edited_message)
            .and_then(|m| {
                m.text.map(|text| InboundMessage {
                    chat_id: m.chat.id.to_string(),
                    text,
                })
            });
        Update {
            update_id: raw.update_id,
            message,
        }
    }
}

pub struct TelegramClient {
    client: reqwest::Client,
    base: String,
    chat_id: String,
    poll_timeout_secs: u64,
    retry: RetryPolicy,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        Self::with_base(config, API_BASE)
    }

    /// Client against another API host (local Bot API server, tests).
    pub fn with_base(config: &TelegramConfig, api_base: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("building telegram HTTP client: {}", e))?;
        Ok(Self {
            client,
            base: format!(
                "{}/bot{}",
                api_base.trim_end_matches('/'),
                config.bot_token.trim()
            ),
            chat_id: config.chat_id.trim().to_string(),
            poll_timeout_secs: config.poll_timeout_secs,
            retry: RetryPolicy::from_config(config),
        })
    }

    async fn send_once(&self, text: &str) -> Result<(), DeliveryError> {
        let resp = self
            .client
            .post(format!("{}/sendMessage", self.base))
            .timeout(SEND_TIMEOUT)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;
        let _: serde_json::Value = decode(resp).await?;
        Ok(())
    }

    async fn poll_once(&self, offset: Option<i64>) -> Result<Vec<Update>, DeliveryError> {
        let mut query = vec![("timeout", self.poll_timeout_secs.to_string())];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        let resp = self
            .client
            .get(format!("{}/getUpdates", self.base))
            .timeout(Duration::from_secs(self.poll_timeout_secs) + POLL_GRACE)
            .query(&query)
            .send()
            .await?;
        let raw: Vec<RawUpdate> = decode(resp).await?;
        Ok(raw.into_iter().map(Update::from).collect())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, DeliveryError> {
    let status = resp.status().as_u16();
    let reply: ApiReply<T> = resp.json().await?;
    match reply {
        ApiReply {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        ApiReply {
            error_code,
            description,
            ..
        } => Err(DeliveryError::Rejected {
            status: error_code.unwrap_or(status),
            description: description.unwrap_or_else(|| "no description".into()),
        }),
    }
}

impl Messenger for TelegramClient {
    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        self.retry.run("telegram.send", move || self.send_once(text)).await?;
        debug!(chars = text.len(), "message delivered");
        Ok(())
    }

    async fn poll(&self, offset: Option<i64>) -> Result<Vec<Update>, DeliveryError> {
        self.retry
            .run("telegram.poll", move || self.poll_once(offset))
            .await
    }
}
