//! Sink and upload error types.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

/// Failure reported by a [`Sink`](crate::Sink).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// Network error, timeout, rate limit or server-side failure.
    #[error("transient failure: {message}")]
    Transient {
        message: String,
        /// Minimum wait requested by the server before retrying.
        retry_after: Option<Duration>,
    },

    /// Authentication failure or a payload the server will never accept.
    #[error("permanent failure: {message}")]
    Permanent { message: String },
}

impl SinkError {
    pub fn transient(message: impl Into<String>) -> Self {
        SinkError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        SinkError::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, SinkError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SinkError::Transient { retry_after, .. } => *retry_after,
            SinkError::Permanent { .. } => None,
        }
    }

    /// Classifies an HTTP error status.
    ///
    /// 408, 425, 429 and 5xx are transient; every other status is permanent.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(body, 512))
        };
        match status {
            408 | 425 | 429 | 500..=599 => SinkError::Transient {
                message,
                retry_after,
            },
            _ => SinkError::Permanent { message },
        }
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        // Never leak URLs (the Telegram token is part of the path).
        let e = e.without_url();
        if e.is_builder() || e.is_decode() {
            SinkError::permanent(e.to_string())
        } else {
            SinkError::transient(e.to_string())
        }
    }
}

/// Upload of one batch failed for good.
#[derive(Debug, Clone, thiserror::Error)]
#[error("batch {batch_index} failed after {attempts} attempt(s): {cause}")]
pub struct UploadError {
    pub batch_index: usize,
    pub attempts: u32,
    #[source]
    pub cause: SinkError,
}

/// Parses a `Retry-After` header given in seconds.
pub(crate) fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn status_classification() {
        assert!(SinkError::from_status(429, "", None).is_transient());
        assert!(SinkError::from_status(503, "busy", None).is_transient());
        assert!(SinkError::from_status(408, "", None).is_transient());
        assert!(!SinkError::from_status(401, "Bad credentials", None).is_transient());
        assert!(!SinkError::from_status(413, "too large", None).is_transient());
        assert!(!SinkError::from_status(422, "", None).is_transient());
    }

    #[test]
    fn retry_after_kept_only_for_transient() {
        let e = SinkError::from_status(429, "", Some(Duration::from_secs(7)));
        assert_eq!(e.retry_after(), Some(Duration::from_secs(7)));

        let e = SinkError::from_status(400, "", Some(Duration::from_secs(7)));
        assert_eq!(e.retry_after(), None);
    }

    #[test]
    fn message_mentions_status_and_body() {
        let e = SinkError::from_status(401, "Bad credentials", None);
        let msg = e.to_string();
        assert!(msg.contains("401"), "{msg}");
        assert!(msg.contains("Bad credentials"), "{msg}");
    }

    #[test]
    fn long_bodies_are_truncated_on_char_boundary() {
        let body = "é".repeat(400);
        let e = SinkError::from_status(500, &body, None);
        assert!(e.to_string().len() < 600);
    }

    #[test]
    fn parses_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_header(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("12"));
        assert_eq!(retry_after_header(&headers), Some(Duration::from_secs(12)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after_header(&headers), None);
    }

    #[test]
    fn upload_error_display() {
        let e = UploadError {
            batch_index: 3,
            attempts: 4,
            cause: SinkError::transient("connection reset"),
        };
        assert_eq!(
            e.to_string(),
            "batch 3 failed after 4 attempt(s): transient failure: connection reset"
        );
    }
}
