//! Command handlers: wires config, sink, store and orchestrator together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use batchvault_pipeline::{Orchestrator, RunError, RunEvent, RunSummary};
use batchvault_progress::{FileKvStore, ProgressStore};
use batchvault_scanner::LocalTree;
use batchvault_sink::{EnvSecrets, SecretSource};
use tokio::sync::mpsc;

use crate::config::Config;

/// Resolved locations for one command invocation.
pub struct Paths {
    pub config_file: PathBuf,
    pub root: PathBuf,
}

impl Paths {
    /// Picks the root from `--root` or the config, canonicalizing when the
    /// folder exists so the progress key does not depend on how it was typed.
    pub fn resolve(
        config: &Config,
        config_file: PathBuf,
        root_override: Option<&PathBuf>,
    ) -> anyhow::Result<Self> {
        let root = match root_override {
            Some(root) => root.clone(),
            None if !config.root_path.is_empty() => PathBuf::from(&config.root_path),
            None => bail!(
                "no folder to back up: set root_path in {} or pass --root",
                config_file.display()
            ),
        };
        let root = std::fs::canonicalize(&root).unwrap_or(root);
        Ok(Self { config_file, root })
    }

    fn root_str(&self) -> String {
        self.root.to_string_lossy().into_owned()
    }
}

fn open_store(config: &Config, paths: &Paths) -> anyhow::Result<ProgressStore> {
    let dir = config.state_dir(&paths.config_file);
    let kv = FileKvStore::open(&dir)
        .with_context(|| format!("cannot open progress store in {}", dir.display()))?;
    Ok(ProgressStore::new(
        Arc::new(kv),
        ProgressStore::key_for_root(&paths.root_str()),
    ))
}

/// Uploads every pending batch of `paths.root`.
pub async fn run(config: Config, paths: Paths) -> anyhow::Result<RunSummary> {
    run_with_secrets(config, paths, &EnvSecrets).await
}

pub async fn run_with_secrets(
    config: Config,
    paths: Paths,
    secrets: &dyn SecretSource,
) -> anyhow::Result<RunSummary> {
    config.validate()?;

    let sink_config = config.sink.as_ref().ok_or_else(|| {
        anyhow!(
            "no [sink] configured in {}",
            paths.config_file.display()
        )
    })?;
    let sink = sink_config.build(secrets)?;
    let store = open_store(&config, &paths)?;

    tracing::info!(
        root = %paths.root.display(),
        sink = sink.kind(),
        store = store.key(),
        "starting run"
    );

    let mut orchestrator = Orchestrator::new(config.pipeline_config(), sink, store);
    let events = orchestrator.take_events();
    let printer = events.map(|rx| tokio::spawn(print_events(rx)));

    let cancel = orchestrator.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after in-flight batches");
            cancel.cancel();
        }
    });

    let source = Arc::new(LocalTree::new(paths.root.clone()));
    let result = orchestrator.run(source).await;

    ctrl_c.abort();
    // Dropping the orchestrator closes the event channel so the printer ends.
    drop(orchestrator);
    if let Some(printer) = printer {
        let _ = printer.await;
    }

    match result {
        Ok(summary) => {
            println!(
                "done: {} uploaded, {} skipped, {} total ({} bytes)",
                summary.uploaded, summary.skipped, summary.total_batches, summary.bytes_uploaded
            );
            Ok(summary)
        }
        Err(RunError::Cancelled) => {
            bail!("run cancelled; run again to resume from the last uploaded batch")
        }
        Err(e) => {
            let stage = e.stage();
            Err(anyhow::Error::new(e).context(format!("{stage} stage failed")))
        }
    }
}

async fn print_events(mut rx: mpsc::Receiver<RunEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            RunEvent::StateChanged { to, .. } => tracing::debug!(state = %to, "state"),
            RunEvent::BatchStarted {
                index,
                total,
                files,
                size,
                destination,
            } => println!(
                "[{}/{total}] uploading {destination} ({files} files, {size} bytes)",
                index + 1
            ),
            RunEvent::BatchUploaded {
                index,
                destination,
                id,
            } => println!("  batch {index} stored as {destination} ({id})"),
            RunEvent::BatchSkipped { index, reason } => {
                println!("  batch {index} skipped: {reason}")
            }
            RunEvent::Retrying {
                index,
                attempt,
                delay,
                error,
            } => println!(
                "  batch {index} attempt {attempt} failed ({error}), retrying in {:.1}s",
                delay.as_secs_f64()
            ),
            RunEvent::Failed {
                stage,
                batch_index,
                error,
            } => match batch_index {
                Some(i) => eprintln!("failed during {stage} at batch {i}: {error}"),
                None => eprintln!("failed during {stage}: {error}"),
            },
            RunEvent::Completed(summary) => {
                if let Some(from) = summary.resumed_from {
                    println!("resumed from batch {from}");
                }
            }
        }
    }
}

/// Describes the stored progress for `paths.root`.
pub fn status(config: &Config, paths: &Paths) -> anyhow::Result<String> {
    let store = open_store(config, paths)?;
    let root = paths.root.display();
    Ok(match store.load()? {
        Some(record) => format!(
            "{root}: {}/{} batches uploaded (run {}, updated {})",
            record.next_index(),
            record.total_batches,
            record.run_label,
            record.updated_at.to_rfc3339()
        ),
        None => format!("{root}: no run in progress"),
    })
}

/// Forgets stored progress for `paths.root`.
pub fn reset(config: &Config, paths: &Paths) -> anyhow::Result<bool> {
    let store = open_store(config, paths)?;
    let existed = store.load()?.is_some();
    store.clear()?;
    Ok(existed)
}

/// Config file to use: `--config` or the platform default.
pub fn config_file(explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(crate::config::config_path)
}
