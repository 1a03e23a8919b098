//! Retrying upload client.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::error::{SinkError, UploadError};
use crate::{Confirmation, Sink};

/// Default per-attempt timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Details of a retry about to happen.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    pub batch_index: usize,
    /// Attempt that just failed (1-based).
    pub attempt: u32,
    /// Wait before the next attempt.
    pub delay: Duration,
    pub error: SinkError,
}

/// Callback invoked before each retry.
pub type RetryCallback = Box<dyn Fn(&RetryNotice) + Send + Sync>;

/// Sends batches to a [`Sink`], retrying transient failures.
///
/// Each attempt runs under `timeout`; an elapsed timeout counts as a
/// transient failure. Up to `max_retries` retries follow the first attempt.
/// A server-provided retry-after duration is honored when it is longer than
/// the backoff delay.
pub struct Uploader {
    sink: Arc<dyn Sink>,
    backoff: Box<dyn BackoffPolicy>,
    max_retries: u32,
    timeout: Duration,
    on_retry: Option<RetryCallback>,
}

impl Uploader {
    pub fn new(sink: Arc<dyn Sink>, backoff: Box<dyn BackoffPolicy>, max_retries: u32) -> Self {
        Self {
            sink,
            backoff,
            max_retries,
            timeout: DEFAULT_TIMEOUT,
            on_retry: None,
        }
    }

    /// Sets the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Box<dyn BackoffPolicy>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Registers a callback invoked before each retry.
    pub fn on_retry(&mut self, callback: RetryCallback) {
        self.on_retry = Some(callback);
    }

    /// Uploads one batch payload.
    pub async fn upload(
        &self,
        batch_index: usize,
        destination: &str,
        bytes: &[u8],
    ) -> Result<Confirmation, UploadError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(self.timeout, self.sink.put(destination, bytes))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(SinkError::transient(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f64()
                ))),
            };

            let error = match result {
                Ok(confirmation) => {
                    debug!(
                        batch = batch_index,
                        attempt,
                        destination,
                        id = %confirmation.id,
                        "upload confirmed"
                    );
                    return Ok(confirmation);
                }
                Err(e) => e,
            };

            if !error.is_transient() || attempt > self.max_retries {
                return Err(UploadError {
                    batch_index,
                    attempts: attempt,
                    cause: error,
                });
            }

            let mut delay = self.backoff.next_delay(attempt);
            if let Some(retry_after) = error.retry_after() {
                delay = delay.max(retry_after);
            }

            warn!(
                batch = batch_index,
                attempt,
                sink = self.sink.kind(),
                delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
                error = %error,
                "upload attempt failed, retrying"
            );

            if let Some(cb) = &self.on_retry {
                cb(&RetryNotice {
                    batch_index,
                    attempt,
                    delay,
                    error,
                });
            }

            tokio::time::sleep(delay).await;
        }
    }
}
