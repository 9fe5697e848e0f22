//! Telegram Bot API publisher
//!
//! Posts the image with its caption through `sendPhoto`. The bot token is part
//! of the request path, so request URLs never reach the logs.

use super::{Publisher, RenderedImage};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_BASE_URL: &str = "https://api.telegram.org";
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Telegram caption limit in characters
pub const CAPTION_LIMIT: usize = 1024;

const USER_AGENT: &str = concat!("dstoic-bot/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
    error_code: Option<i64>,
    result: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

pub struct TelegramPublisher {
    http_client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramPublisher {
    pub fn new(config: TelegramConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http_client,
            config,
        })
    }

    fn send_photo_url(&self) -> String {
        format!(
            "{}/bot{}/sendPhoto",
            self.config.base_url.trim_end_matches('/'),
            self.config.bot_token
        )
    }
}

/// Describe a transport failure without the request URL
fn describe_transport_error(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "request timed out"
    } else if e.is_connect() {
        "connection failed"
    } else if e.is_body() || e.is_decode() {
        "invalid response body"
    } else {
        "request failed"
    }
}

#[async_trait]
impl Publisher for TelegramPublisher {
    async fn publish(&self, destination: &str, image: &RenderedImage, caption: &str) -> bool {
        if destination.trim().is_empty() {
            error!("No Telegram destination chat configured");
            return false;
        }
        if image.bytes.is_empty() {
            error!("Refusing to publish an empty image");
            return false;
        }

        info!(chat_id = destination, size = image.bytes.len(), "Posting image to Telegram");

        let photo = match Part::bytes(image.bytes.clone())
            .file_name(format!("quote.{}", image.extension()))
            .mime_str(&image.mime_type)
        {
            Ok(part) => part,
            Err(_) => {
                error!(mime_type = %image.mime_type, "Invalid image MIME type");
                return false;
            }
        };
        let form = Form::new()
            .text("chat_id", destination.to_string())
            .text("caption", caption.to_string())
            .part("photo", photo);

        let response = match self
            .http_client
            .post(self.send_photo_url())
            .multipart(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(
                    chat_id = destination,
                    error = describe_transport_error(&e),
                    "Telegram request failed"
                );
                return false;
            }
        };

        let status = response.status();
        let body: Option<ApiResponse> = response.json().await.ok();
        match body {
            Some(ApiResponse {
                ok: true, result, ..
            }) if status.is_success() => {
                let message_id = result.map(|message| message.message_id);
                info!(chat_id = destination, message_id = ?message_id, "Posted to Telegram");
                true
            }
            Some(api) => {
                error!(
                    chat_id = destination,
                    status = status.as_u16(),
                    error_code = ?api.error_code,
                    description = api.description.as_deref().unwrap_or("none"),
                    "Telegram rejected the post"
                );
                false
            }
            None => {
                error!(
                    chat_id = destination,
                    status = status.as_u16(),
                    "Telegram returned an unreadable response"
                );
                false
            }
        }
    }
}
