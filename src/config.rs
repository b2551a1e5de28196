//! pagewatch configuration.
//!
//! Loaded from `~/.pagewatch/config.toml` unless `--config` points elsewhere.
//! Every key is optional; a missing file means all defaults.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Environment variable consulted when `api-token` is not set.
pub const TOKEN_ENV: &str = "PAGEWATCH_API_TOKEN";

/// pagewatch configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Base URL of the record store API.
    pub api_url: String,

    /// Value of the `Notion-Version` header.
    pub api_version: String,

    pub api_token: Option<String>,

    /// The JSON rules file, watched for changes.
    pub rules_path: PathBuf,

    /// Directory holding one snapshot file per collection.
    pub storage_dir: PathBuf,

    /// Sleep between poll cycles.
    pub poll_interval_secs: u64,

    /// How far back the first poll of a collection looks for edits.
    pub initial_lookback_minutes: i64,

    /// Overlap added to every later lookback window.
    pub lookback_padding_minutes: i64,

    /// Timeout applied to every outbound HTTP call.
    pub request_timeout_secs: u64,

    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub page_size: u32,

    /// Heartbeat endpoint pinged with `?state=run|complete|fail`.
    pub health_url: Option<String>,

    /// Recipient of fatal-error notifications.
    pub operator_email: Option<String>,

    pub email_from: String,
    pub sendmail_path: PathBuf,

    /// How long an action subprocess may run before it is killed.
    pub action_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        let home = home_dir();
        Self {
            api_url: "https://api.notion.com/v1".to_string(),
            api_version: "2022-06-28".to_string(),
            api_token: None,
            rules_path: home.join("rules.json"),
            storage_dir: home.join("storage"),
            poll_interval_secs: 5,
            initial_lookback_minutes: 45,
            lookback_padding_minutes: 10,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_delay_secs: 30,
            page_size: 100,
            health_url: None,
            operator_email: None,
            email_from: "pagewatch@localhost".to_string(),
            sendmail_path: PathBuf::from("/usr/sbin/sendmail"),
            action_timeout_secs: 300,
        }
    }
}

impl Config {
    /// Load config from `path`, or from `~/.pagewatch/config.toml` when `None`.
    ///
    /// A missing default file yields defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (home_dir().join("config.toml"), false),
        };

        let contents = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !explicit => {
                return Ok(Self::default());
            }
            Err(e) => return Err(format!("failed to read {}: {e}", path.display())),
        };

        Self::parse(&contents).map_err(|e| format!("invalid config at {}: {e}", path.display()))
    }

    fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// The API token from the config file, else from [`TOKEN_ENV`].
    pub fn token(&self) -> Option<String> {
        if let Some(token) = &self.api_token
            && !token.is_empty()
        {
            return Some(token.clone());
        }
        env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }
}

/// The pagewatch home: `~/.pagewatch`, or `./.pagewatch` without a home directory.
fn home_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pagewatch")
}
