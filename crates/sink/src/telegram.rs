//! Telegram bot sink: each payload is sent as a document to one chat.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use crate::error::{SinkError, retry_after_header};
use crate::{Confirmation, Sink};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Bot API envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<Message>,
    #[serde(default)]
    error_code: Option<u16>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

pub struct TelegramSink {
    http: reqwest::Client,
    api_url: String,
    token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(token: &str, chat_id: &str) -> Result<Self, SinkError> {
        if token.is_empty() || token.contains('/') {
            return Err(SinkError::permanent("invalid bot token"));
        }
        let http = reqwest::Client::builder()
            .user_agent("batchvault")
            .build()
            .map_err(SinkError::from)?;
        Ok(Self {
            http,
            api_url: DEFAULT_API_URL.to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    async fn send_document(
        &self,
        destination: &str,
        bytes: &[u8],
    ) -> Result<Confirmation, SinkError> {
        let url = format!("{}/bot{}/sendDocument", self.api_url, self.token);
        let part = Part::bytes(bytes.to_vec())
            .file_name(destination.to_string())
            .mime_str("application/octet-stream")
            .map_err(SinkError::from)?;
        let form = Form::new()
            .text("chat_id", self.chat_id.clone())
            .part("document", part);

        debug!(chat = %self.chat_id, destination, size = bytes.len(), "sendDocument");
        let resp = self.http.post(&url).multipart(form).send().await?;
        let status = resp.status().as_u16();
        let header_wait = retry_after_header(resp.headers());
        let text = resp.text().await?;

        match serde_json::from_str::<ApiResponse>(&text) {
            Ok(api) => interpret(api, status, header_wait, destination),
            Err(_) => Err(SinkError::from_status(status, &text, header_wait)),
        }
    }
}

impl Sink for TelegramSink {
    fn put<'a>(
        &'a self,
        destination: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Confirmation, SinkError>> + Send + 'a>> {
        Box::pin(self.send_document(destination, bytes))
    }

    fn kind(&self) -> &'static str {
        "telegram"
    }
}

fn interpret(
    api: ApiResponse,
    status: u16,
    header_wait: Option<Duration>,
    destination: &str,
) -> Result<Confirmation, SinkError> {
    if api.ok {
        let message = api
            .result
            .ok_or_else(|| SinkError::permanent("response missing result"))?;
        return Ok(Confirmation {
            destination: destination.to_string(),
            id: message.message_id.to_string(),
        });
    }

    let code = api.error_code.unwrap_or(status);
    let wait = api
        .parameters
        .and_then(|p| p.retry_after)
        .map(Duration::from_secs)
        .or(header_wait);
    let description = api.description.unwrap_or_default();
    Err(SinkError::from_status(code, &description, wait))
}
