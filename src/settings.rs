use crate::activation::PollPolicy;
use crate::coordinates::ColumnNames;
use crate::error::ConfigError;
use crate::geo_query::{SearchWindow, DEFAULT_ITEM_TYPE};
use crate::planet::DEFAULT_API_URL;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const CREDENTIAL_VARS: [&str; 2] = ["PL_API_KEY", "API_KEY"];
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;

/// Provider API key. Read once at startup and handed to the client that needs it.
#[derive(Clone)]
pub struct Credential {
    api_key: String,
}

impl Credential {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
        }
    }

    /// Looks in the process environment after loading a `.env` file, if any.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        CREDENTIAL_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .map(|api_key| Self { api_key })
            .ok_or(ConfigError::MissingCredential)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Everything about a run that is not a per-invocation flag. Can be kept in a
/// TOML file; command-line flags take precedence over it.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub api_url: Url,
    pub item_type: String,
    pub search: SearchWindow,
    pub columns: ColumnNames,
    /// Raised to [`MIN_POLL_INTERVAL_SECS`] when lower.
    pub poll_interval_secs: u64,
    /// Zero waits for activation without limit.
    pub max_wait_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("Default API url should always parse"),
            item_type: DEFAULT_ITEM_TYPE.to_string(),
            search: SearchWindow::default(),
            columns: ColumnNames::default(),
            poll_interval_secs: 10,
            max_wait_secs: 3600,
            request_timeout_secs: 60,
        }
    }
}

impl Settings {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::SettingsParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.poll_interval_secs.max(MIN_POLL_INTERVAL_SECS)),
            max_wait: match self.max_wait_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
