//! Client configuration, loadable from JSON

use range_dl::{DownloadError, RangeDownloadConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::crypto::CredentialExchange;
use crate::mount::MountSettingsApi;

pub const DEFAULT_PUBLIC_KEY_URL: &str = "https://chat.yhchat.com/assets/key/apps_public.pem";
pub const DEFAULT_API_BASE_URL: &str = "https://chat-go.jwzhd.com/";
/// Directory name under the system temp dir when `downloads_dir` is unset
pub const DEFAULT_DOWNLOADS_DIR_NAME: &str = "yhchat-downloads";
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Replacement for the compiled-in fallback public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedKey {
    pub pem: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub public_key_url: String,
    pub api_base_url: String,
    /// Where finished downloads land
    pub downloads_dir: Option<PathBuf>,
    /// Connect and per-read timeout; 0 disables both
    pub io_timeout_secs: u64,
    pub user_agent: String,
    pub fallback_key: Option<PinnedKey>,
    pub download: RangeDownloadConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            public_key_url: DEFAULT_PUBLIC_KEY_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            downloads_dir: None,
            io_timeout_secs: DEFAULT_IO_TIMEOUT_SECS,
            user_agent: concat!("davmount/", env!("CARGO_PKG_VERSION")).to_string(),
            fallback_key: None,
            download: RangeDownloadConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.public_key_url.trim().is_empty() {
            return Err(ConfigError::Invalid("public_key_url is empty".into()));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("api_base_url is empty".into()));
        }
        if let Some(key) = &self.fallback_key {
            if key.pem.trim().is_empty() || key.version.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "fallback_key needs both pem and version".into(),
                ));
            }
        }
        self.download.validate()?;
        Ok(())
    }

    pub fn downloads_dir(&self) -> PathBuf {
        match &self.downloads_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir().join(DEFAULT_DOWNLOADS_DIR_NAME),
        }
    }

    pub fn http_client(&self) -> Result<Client, ConfigError> {
        let mut builder = Client::builder().user_agent(self.user_agent.clone());
        if self.io_timeout_secs > 0 {
            let timeout = Duration::from_secs(self.io_timeout_secs);
            builder = builder.connect_timeout(timeout).read_timeout(timeout);
        }
        builder.build().map_err(ConfigError::HttpClient)
    }

    pub fn credential_exchange(&self, client: Client) -> CredentialExchange {
        let exchange = CredentialExchange::new(client, &self.public_key_url);
        match &self.fallback_key {
            Some(key) => exchange.with_fallback(&key.pem, &key.version),
            None => exchange,
        }
    }

    pub fn mount_api(&self, client: Client, token: impl Into<String>) -> MountSettingsApi {
        let exchange = self.credential_exchange(client.clone());
        MountSettingsApi::new(client, &self.api_base_url, token, exchange)
    }
}
