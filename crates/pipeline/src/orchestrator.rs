//! Run orchestrator.
//!
//! Drives enumeration, packing and upload for one source tree, reports
//! progress events, and supports cancellation between batches.

use std::sync::Arc;

use batchvault_packer::{Batch, PackMode, pack, plan_digest, serialize};
use batchvault_progress::{ProgressRecord, ProgressStore};
use batchvault_scanner::{FileRecord, SourceTree, scan};
use batchvault_sink::{BackoffPolicy, Confirmation, ExponentialBackoff, RetryNotice, Sink, Uploader};
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::cursor::ContiguousCursor;
use crate::error::RunError;
use crate::types::{OversizePolicy, PipelineConfig, RunEvent, RunState, RunSummary};

const EVENT_CAPACITY: usize = 256;

/// Destination name for `batch`, stable across resumed runs with the same
/// label.
pub fn destination_name(prefix: &str, run_label: &str, batch: &Batch, mode: PackMode) -> String {
    match mode {
        PackMode::Zip => format!("{prefix}-{run_label}-{}.zip", batch.index),
        PackMode::Direct => {
            let name = batch.files.first().map_or("file", |f| f.file_name());
            format!("{prefix}-{run_label}-{}-{name}", batch.index)
        }
    }
}

/// Label for a fresh run: the current UTC time, second precision.
pub fn new_run_label() -> String {
    Utc::now().format("%Y%m%dT%H%M%SZ").to_string()
}

/// Where a run starts and the label its destinations use.
struct ResumePoint {
    start: usize,
    run_label: String,
}

/// Plan-wide values needed to write a progress record.
struct Plan<'a> {
    total: usize,
    digest: &'a str,
    run_label: &'a str,
}

/// Runs the scan → pack → upload pipeline against one sink and store.
pub struct Orchestrator {
    config: PipelineConfig,
    uploader: Uploader,
    store: ProgressStore,
    events_tx: mpsc::Sender<RunEvent>,
    events_rx: Option<mpsc::Receiver<RunEvent>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, sink: Arc<dyn Sink>, store: ProgressStore) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

        let mut uploader = Uploader::new(
            sink,
            Box::new(ExponentialBackoff::new(config.retry_backoff)),
            config.max_retries,
        )
        .with_timeout(config.upload_timeout);

        let retry_tx = events_tx.clone();
        uploader.on_retry(Box::new(move |notice: &RetryNotice| {
            let _ = retry_tx.try_send(RunEvent::Retrying {
                index: notice.batch_index,
                attempt: notice.attempt,
                delay: notice.delay,
                error: notice.error.to_string(),
            });
        }));

        Self {
            config,
            uploader,
            store,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Replaces the retry backoff derived from the config.
    pub fn with_backoff(mut self, backoff: Box<dyn BackoffPolicy>) -> Self {
        self.uploader = self.uploader.with_backoff(backoff);
        self
    }

    /// Takes the event receiver. Can only be called once.
    ///
    /// Events are dropped rather than queued when the receiver falls behind.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<RunEvent>> {
        self.events_rx.take()
    }

    /// Token that stops the run before the next batch starts.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Runs the pipeline over `source` until completion, failure or
    /// cancellation.
    pub async fn run(&self, source: Arc<dyn SourceTree>) -> Result<RunSummary, RunError> {
        let mut ctx = RunContext::new(self.cancel.clone());

        match self.execute(&mut ctx, source).await {
            Ok(summary) => Ok(summary),
            Err(RunError::Cancelled) => {
                self.set_state(&mut ctx, RunState::Cancelled);
                warn!(
                    uploaded = ctx.uploaded,
                    total = ctx.total_batches,
                    "run cancelled"
                );
                Err(RunError::Cancelled)
            }
            Err(e) => {
                let stage = ctx.state();
                self.set_state(&mut ctx, RunState::Failed);
                error!(stage = %stage, batch = ?e.batch_index(), error = %e, "run failed");
                self.emit(RunEvent::Failed {
                    stage,
                    batch_index: e.batch_index(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        ctx: &mut RunContext,
        source: Arc<dyn SourceTree>,
    ) -> Result<RunSummary, RunError> {
        self.set_state(ctx, RunState::Enumerating);
        let records = self.enumerate(Arc::clone(&source)).await?;

        self.set_state(ctx, RunState::Packing);
        let mut batches = self.pack_batches(records, Arc::clone(&source)).await?;
        ctx.total_batches = batches.len();
        self.check_oversize(&batches)?;

        let digest = plan_digest(&batches);
        let resume = self.resume_point(&digest, batches.len())?;
        if resume.start > 0 {
            ctx.resumed_from = Some(resume.start);
        }

        self.set_state(ctx, RunState::Uploading);
        let pending = batches.split_off(resume.start.min(batches.len()));
        drop(batches);

        let plan = Plan {
            total: ctx.total_batches,
            digest: &digest,
            run_label: &resume.run_label,
        };
        self.upload_all(ctx, pending, source, &plan).await?;

        self.store
            .clear()
            .map_err(RunError::store(RunState::Uploading))?;
        self.set_state(ctx, RunState::Completed);

        let summary = ctx.summary();
        info!(
            total = summary.total_batches,
            uploaded = summary.uploaded,
            skipped = summary.skipped,
            bytes = summary.bytes_uploaded,
            "run completed"
        );
        self.emit(RunEvent::Completed(summary.clone()));
        Ok(summary)
    }

    async fn enumerate(&self, source: Arc<dyn SourceTree>) -> Result<Vec<FileRecord>, RunError> {
        let options = self.config.scan.clone();
        let root = source.root_name();

        let records = tokio::task::spawn_blocking(move || scan(&*source, &options))
            .await
            .map_err(RunError::task(RunState::Enumerating))??;

        if records.is_empty() {
            return Err(RunError::EmptySource { root });
        }
        Ok(records)
    }

    async fn pack_batches(
        &self,
        records: Vec<FileRecord>,
        source: Arc<dyn SourceTree>,
    ) -> Result<Vec<Batch>, RunError> {
        let options = self.config.pack.clone();
        let batches = tokio::task::spawn_blocking(move || pack(&records, &*source, &options))
            .await
            .map_err(RunError::task(RunState::Packing))??;
        Ok(batches)
    }

    fn check_oversize(&self, batches: &[Batch]) -> Result<(), RunError> {
        if self.config.oversize_policy != OversizePolicy::Reject {
            return Ok(());
        }
        match batches.iter().find(|b| b.over_limit) {
            Some(b) => Err(RunError::OverLimit {
                batch_index: b.index,
                path: b.files.first().map(|f| f.path.clone()).unwrap_or_default(),
                size: b.size,
                ceiling: self.config.pack.ceiling,
            }),
            None => Ok(()),
        }
    }

    /// Reads the stored cursor. A cursor recorded against a different plan
    /// is discarded.
    fn resume_point(&self, digest: &str, total: usize) -> Result<ResumePoint, RunError> {
        let stored = self
            .store
            .load()
            .map_err(RunError::store(RunState::Packing))?;
        match stored {
            Some(record) if record.plan_digest == digest && record.total_batches == total => {
                let start = record.next_index().min(total);
                info!(start, total, run_label = %record.run_label, "resuming previous run");
                Ok(ResumePoint {
                    start,
                    run_label: record.run_label,
                })
            }
            Some(record) => {
                warn!(
                    stored_total = record.total_batches,
                    total, "batch plan changed since the last run, starting over"
                );
                self.store
                    .clear()
                    .map_err(RunError::store(RunState::Packing))?;
                Ok(ResumePoint {
                    start: 0,
                    run_label: new_run_label(),
                })
            }
            None => Ok(ResumePoint {
                start: 0,
                run_label: new_run_label(),
            }),
        }
    }

    /// Uploads `pending` with up to `concurrency` batches in flight.
    ///
    /// The cursor only moves over a contiguous prefix. After the first
    /// failure or a cancellation no new batch starts, but in-flight uploads
    /// are awaited and their successes still recorded.
    async fn upload_all(
        &self,
        ctx: &mut RunContext,
        pending: Vec<Batch>,
        source: Arc<dyn SourceTree>,
        plan: &Plan<'_>,
    ) -> Result<(), RunError> {
        let start = pending.first().map_or(plan.total, |b| b.index);
        let limit = self.config.concurrency.max(1);
        let mode = self.config.pack.mode;

        let mut cursor = ContiguousCursor::new(start);
        let mut queue = pending.into_iter();
        let mut in_flight = FuturesUnordered::new();
        let mut failure: Option<RunError> = None;
        let mut cancelled = false;

        loop {
            while failure.is_none() && !cancelled && in_flight.len() < limit {
                if ctx.is_cancelled() {
                    cancelled = true;
                    break;
                }
                let Some(batch) = queue.next() else {
                    break;
                };

                if batch.over_limit && self.config.oversize_policy == OversizePolicy::Skip {
                    warn!(batch = batch.index, size = batch.size, "skipping over-limit batch");
                    ctx.skipped += 1;
                    self.emit(RunEvent::BatchSkipped {
                        index: batch.index,
                        reason: format!(
                            "{} bytes exceeds the {}-byte ceiling",
                            batch.size, self.config.pack.ceiling
                        ),
                    });
                    if let Err(e) = self.advance(&mut cursor, batch.index, plan) {
                        failure = Some(e);
                    }
                    continue;
                }

                let destination =
                    destination_name(&self.config.archive_prefix, plan.run_label, &batch, mode);
                info!(
                    batch = batch.index,
                    total = plan.total,
                    files = batch.files.len(),
                    size = batch.size,
                    %destination,
                    "uploading batch"
                );
                self.emit(RunEvent::BatchStarted {
                    index: batch.index,
                    total: plan.total,
                    files: batch.files.len(),
                    size: batch.size,
                    destination: destination.clone(),
                });

                let batch_source = Arc::clone(&source);
                in_flight.push(async move {
                    let index = batch.index;
                    let result = self.send(batch, batch_source, &destination).await;
                    (index, destination, result)
                });
            }

            let Some((index, destination, result)) = in_flight.next().await else {
                break;
            };

            match result {
                Ok((confirmation, size)) => {
                    ctx.uploaded += 1;
                    ctx.bytes_uploaded += size;
                    info!(batch = index, id = %confirmation.id, "batch uploaded");
                    self.emit(RunEvent::BatchUploaded {
                        index,
                        destination,
                        id: confirmation.id,
                    });
                    if let Err(e) = self.advance(&mut cursor, index, plan) {
                        if failure.is_none() {
                            failure = Some(e);
                        }
                    }
                }
                Err(e) => {
                    error!(batch = index, error = %e, "batch upload failed");
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        if cursor.pending() > 0 {
            debug!(
                completed = ?cursor.completed(),
                ahead = cursor.pending(),
                "uploads past a gap are not recorded"
            );
        }

        match (failure, cancelled) {
            (Some(e), _) => Err(e),
            (None, true) => Err(RunError::Cancelled),
            (None, false) => Ok(()),
        }
    }

    /// Builds the payload of `batch` and uploads it. Returns the confirmation
    /// and the number of bytes sent; the payload is dropped on return.
    async fn send(
        &self,
        batch: Batch,
        source: Arc<dyn SourceTree>,
        destination: &str,
    ) -> Result<(Confirmation, u64), RunError> {
        let index = batch.index;
        let options = self.config.pack.clone();
        let payload = tokio::task::spawn_blocking(move || serialize(&batch, &*source, &options))
            .await
            .map_err(RunError::task(RunState::Uploading))?
            .map_err(|source| RunError::Payload {
                batch_index: index,
                source,
            })?;

        let confirmation = self.uploader.upload(index, destination, &payload).await?;
        Ok((confirmation, payload.len() as u64))
    }

    /// Marks `index` finished and persists the cursor if it moved.
    fn advance(
        &self,
        cursor: &mut ContiguousCursor,
        index: usize,
        plan: &Plan<'_>,
    ) -> Result<(), RunError> {
        if let Some(completed) = cursor.mark(index) {
            self.store.save(&ProgressRecord {
                completed_batch_index: completed,
                total_batches: plan.total,
                updated_at: Utc::now(),
                plan_digest: plan.digest.to_string(),
                run_label: plan.run_label.to_string(),
            })
            .map_err(RunError::store(RunState::Uploading))?;
        }
        Ok(())
    }

    fn set_state(&self, ctx: &mut RunContext, next: RunState) {
        let from = ctx.transition(next);
        self.emit(RunEvent::StateChanged { from, to: next });
    }

    fn emit(&self, event: RunEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.events_tx.try_send(event) {
            debug!("event channel full, dropping event");
        }
    }
}
