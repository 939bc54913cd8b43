use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No API key found, set PL_API_KEY (or API_KEY) in the environment or a .env file")]
    MissingCredential,
    #[error("Unable to read coordinate file {path}: {source}")]
    CoordinateFile { path: PathBuf, source: csv::Error },
    #[error("Coordinate file {path} has no column named '{column}'")]
    MissingColumn { path: PathBuf, column: String },
    #[error("Unable to read settings file {path}: {source}")]
    SettingsIo {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid settings file {path}: {source}")]
    SettingsParse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Anything that went wrong talking to a remote endpoint. Always carries the URL
/// so a failed item can be retried by hand.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request to {url} failed: {source}")]
    Request { url: Url, source: reqwest::Error },
    #[error("Request to {url} returned HTTP {status}")]
    Status { url: Url, status: u16 },
    #[error("Unable to decode response from {url}: {reason}")]
    Decode { url: Url, reason: String },
    #[error("Response body from {url} was interrupted: {reason}")]
    Stream { url: Url, reason: String },
    #[error("No response from {url} within {after:?}")]
    TimedOut { url: Url, after: Duration },
}

impl TransportError {
    pub fn url(&self) -> &Url {
        match self {
            Self::Request { url, .. }
            | Self::Status { url, .. }
            | Self::Decode { url, .. }
            | Self::Stream { url, .. }
            | Self::TimedOut { url, .. } => url,
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Asset at {url} was not active after {waited:?}")]
    Timeout { url: Url, waited: Duration },
    #[error("Cancelled")]
    Cancelled,
    #[error("Asset '{asset}' has no {link} link")]
    MissingLink { asset: String, link: &'static str },
    #[error("Unable to append to link file: {0}")]
    Sink(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Download of {url} stopped after {bytes} bytes, partial file left at {path}: {source}")]
    PartialWrite {
        url: Url,
        path: PathBuf,
        bytes: u64,
        source: TransportError,
    },
    #[error("Download of {url} cancelled after {bytes} bytes, partial file left at {path}")]
    CancelledPartial { url: Url, path: PathBuf, bytes: u64 },
    #[error("Unable to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cancelled")]
    Cancelled,
}
