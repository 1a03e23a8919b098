//! batchvault configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/batchvault/config.toml` (or `$XDG_CONFIG_HOME`)
//! - Windows: `%APPDATA%/batchvault/config.toml`
//!
//! Credentials never live here; the `[sink]` table names the environment
//! variable each token is read from.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use batchvault_packer::{Compression, PackMode, PackOptions};
use batchvault_pipeline::{OversizePolicy, PipelineConfig};
use batchvault_scanner::{ScanOptions, SortKey};
use batchvault_sink::SinkConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Folder to back up. `--root` overrides it.
    #[serde(default)]
    pub root_path: String,

    /// Extension allow-list; empty accepts every file.
    #[serde(default)]
    pub extension_filter: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<SortKey>,

    /// Maximum serialized size of one batch, in bytes.
    #[serde(default = "default_ceiling")]
    pub batch_byte_ceiling: u64,

    /// Retries after the first attempt of each batch.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay in milliseconds; doubles on each retry.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Batches uploaded in parallel.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub mode: PackMode,

    #[serde(default)]
    pub compression: Compression,

    #[serde(default)]
    pub oversize_policy: OversizePolicy,

    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,

    #[serde(default = "default_archive_prefix")]
    pub archive_prefix: String,

    /// Where progress records are kept. Defaults to a `state` directory next
    /// to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<SinkConfig>,
}

fn default_ceiling() -> u64 {
    100 * 1024 * 1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

fn default_concurrency() -> usize {
    1
}

fn default_upload_timeout_secs() -> u64 {
    120
}

fn default_archive_prefix() -> String {
    "backup".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_path: String::new(),
            extension_filter: Vec::new(),
            sort_by: None,
            batch_byte_ceiling: default_ceiling(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            concurrency: default_concurrency(),
            mode: PackMode::default(),
            compression: Compression::default(),
            oversize_policy: OversizePolicy::default(),
            upload_timeout_secs: default_upload_timeout_secs(),
            archive_prefix: default_archive_prefix(),
            state_dir: None,
            sink: None,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, writing a default file if none exists.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("invalid config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            Ok(config)
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Rejects values the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_byte_ceiling == 0 {
            bail!("batch_byte_ceiling must be greater than zero");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.upload_timeout_secs == 0 {
            bail!("upload_timeout_secs must be greater than zero");
        }
        if self.archive_prefix.is_empty() || self.archive_prefix.contains(['/', '\\', '-']) {
            bail!(
                "archive_prefix {:?} must be non-empty and free of '/', '\\' and '-'",
                self.archive_prefix
            );
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            scan: ScanOptions {
                extensions: self.extension_filter.clone(),
                sort: self.sort_by,
            },
            pack: PackOptions {
                ceiling: self.batch_byte_ceiling,
                mode: self.mode,
                compression: self.compression,
            },
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            concurrency: self.concurrency,
            upload_timeout: Duration::from_secs(self.upload_timeout_secs),
            oversize_policy: self.oversize_policy,
            archive_prefix: self.archive_prefix.clone(),
        }
    }

    /// Directory of the progress store for a config loaded from `config_file`.
    pub fn state_dir(&self, config_file: &Path) -> PathBuf {
        match &self.state_dir {
            Some(dir) => dir.clone(),
            None => config_file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join("state"),
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("batchvault").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            });
        base.join("batchvault").join("config.toml")
    }
}
