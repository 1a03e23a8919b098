//! Generic HTTP PUT sink.

use std::future::Future;
use std::pin::Pin;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, ETAG, HeaderMap, HeaderValue};
use tracing::debug;

use crate::error::{SinkError, retry_after_header};
use crate::{Confirmation, Sink};

/// PUTs each payload to `{base_url}/{destination}`.
pub struct HttpPutSink {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPutSink {
    pub fn new(base_url: &str, bearer: Option<&str>) -> Result<Self, SinkError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = bearer {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| SinkError::permanent("token contains invalid characters"))?,
            );
        }
        let http = reqwest::Client::builder()
            .user_agent("batchvault")
            .default_headers(headers)
            .build()
            .map_err(SinkError::from)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn put_object(&self, destination: &str, bytes: &[u8]) -> Result<Confirmation, SinkError> {
        let url = format!("{}/{destination}", self.base_url);
        debug!(%url, size = bytes.len(), "PUT object");

        let resp = self
            .http
            .put(&url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let wait = retry_after_header(resp.headers());
            let text = resp.text().await.unwrap_or_default();
            return Err(SinkError::from_status(status.as_u16(), &text, wait));
        }

        let id = resp
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string())
            .unwrap_or_else(|| status.as_u16().to_string());

        Ok(Confirmation {
            destination: destination.to_string(),
            id,
        })
    }
}

impl Sink for HttpPutSink {
    fn put<'a>(
        &'a self,
        destination: &'a str,
        bytes: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Confirmation, SinkError>> + Send + 'a>> {
        Box::pin(self.put_object(destination, bytes))
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}
