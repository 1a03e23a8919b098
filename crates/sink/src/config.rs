//! Sink selection from configuration.
//!
//! Tokens are never stored in the config file; each sink names the
//! environment variable its credential is read from.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SinkError;
use crate::{GithubSink, HttpPutSink, Sink, TelegramSink};

/// Resolves named credentials.
pub trait SecretSource {
    fn resolve(&self, name: &str) -> Option<String>;
}

/// Reads credentials from process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn resolve(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed credential map.
#[derive(Debug, Default, Clone)]
pub struct StaticSecrets(pub HashMap<String, String>);

impl StaticSecrets {
    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }
}

impl SecretSource for StaticSecrets {
    fn resolve(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("credential {0} is not set")]
    MissingSecret(String),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

fn default_github_token_env() -> String {
    "GITHUB_TOKEN".into()
}

fn default_telegram_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".into()
}

/// Upload destination, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    Github {
        /// `owner/name`.
        repo: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default)]
        path_prefix: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default = "default_github_token_env")]
        token_env: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_url: Option<String>,
    },
    Telegram {
        chat_id: String,
        #[serde(default = "default_telegram_token_env")]
        token_env: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_url: Option<String>,
    },
    Http {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_env: Option<String>,
    },
}

impl SinkConfig {
    /// Builds the configured sink, resolving its credential from `secrets`.
    pub fn build(&self, secrets: &dyn SecretSource) -> Result<Arc<dyn Sink>, BuildError> {
        let secret = |name: &str| {
            secrets
                .resolve(name)
                .ok_or_else(|| BuildError::MissingSecret(name.to_string()))
        };

        let sink: Arc<dyn Sink> = match self {
            SinkConfig::Github {
                repo,
                branch,
                path_prefix,
                message,
                token_env,
                api_url,
            } => {
                let mut s = GithubSink::new(&secret(token_env)?, repo)?.with_path_prefix(path_prefix);
                if let Some(branch) = branch {
                    s = s.with_branch(branch.clone());
                }
                if let Some(message) = message {
                    s = s.with_message(message.clone());
                }
                if let Some(url) = api_url {
                    s = s.with_api_url(url.clone());
                }
                Arc::new(s)
            }
            SinkConfig::Telegram {
                chat_id,
                token_env,
                api_url,
            } => {
                let mut s = TelegramSink::new(&secret(token_env)?, chat_id)?;
                if let Some(url) = api_url {
                    s = s.with_api_url(url.clone());
                }
                Arc::new(s)
            }
            SinkConfig::Http { url, token_env } => {
                let token = token_env.as_deref().map(secret).transpose()?;
                Arc::new(HttpPutSink::new(url, token.as_deref())?)
            }
        };
        Ok(sink)
    }
}
