use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration file {0} was missing, a default one has been written")]
    ConfigMissing(PathBuf),
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("HTTP client error: {0}")]
    HttpRequest(#[from] reqwest::Error),
    #[error("Invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Failed to fetch size of {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Failed to persist sizes to {path}: {source}")]
    PersistenceFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Webhook notification failed: {0}")]
    NotificationFailed(#[source] reqwest::Error),
    #[error("The {0} lane is closed")]
    LaneClosed(&'static str),
}
