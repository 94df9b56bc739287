use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::Error;

pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DEFAULT_CONNECTIVITY_URL: &str = "https://discord.com/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub config: ConfigOptions,
    pub sites: SiteList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOptions {
    pub webhook_url: Option<String>,
    pub check_interval_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    pub role_id: Option<String>,
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_connectivity_url")]
    pub connectivity_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteList {
    pub urls: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("storage.json")
}

fn default_connectivity_url() -> String {
    DEFAULT_CONNECTIVITY_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config: ConfigOptions {
                webhook_url: Some("https://discord.com/".to_string()),
                check_interval_ms: 60_000,
                timeout_secs: default_timeout_secs(),
                role_id: Some(String::new()),
                storage_path: default_storage_path(),
                connectivity_url: default_connectivity_url(),
            },
            sites: SiteList {
                urls: vec![
                    "https://cs.fit.edu/~dmitra/ArtInt/Spr2024/AI-PlanSp2024.doc".to_string(),
                ],
            },
        }
    }
}

impl Config {
    /// Resolves the configuration path, honouring `DOCLOOKOUT_CONFIG`.
    pub fn path() -> PathBuf {
        dotenvy::var("DOCLOOKOUT_CONFIG")
            .map_or_else(|_| PathBuf::from(CONFIG_FILE_NAME), PathBuf::from)
    }

    /// Loads the configuration at `path`.
    ///
    /// If no file exists there, the default configuration is written to it and
    /// [`Error::ConfigMissing`] is returned so the caller can stop and let the
    /// operator fill it in.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigMissing`] when the file had to be created, and
    /// [`Error::ConfigInvalid`] when it cannot be parsed or holds unusable
    /// values.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let path = path.as_ref();

        if !path.exists() {
            Self::write_default(path)?;
            return Err(Error::ConfigMissing(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let mut config: Config =
            toml::from_str(&content).map_err(|e| Error::ConfigInvalid(e.to_string()))?;

        // Fall back to the environment for the secrets
        if config.config.webhook_url.is_none() {
            config.config.webhook_url = dotenvy::var("WEBHOOK_URL").ok();
        }
        if config.config.role_id.is_none() {
            config.config.role_id = dotenvy::var("ROLE_ID").ok();
        }

        config.validate()?;
        Ok(config)
    }

    fn write_default(path: &Path) -> Result<(), Error> {
        let content = toml::to_string_pretty(&Config::default())?;
        fs::write(path, content)?;
        info!("Created default configuration file at {}", path.display());
        Ok(())
    }

    fn validate(&self) -> Result<(), Error> {
        if self.config.check_interval_ms == 0 {
            return Err(Error::ConfigInvalid(
                "check_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.config.timeout_secs == 0 {
            return Err(Error::ConfigInvalid(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.config.check_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// The role to mention in notifications, if any. Blank means nobody.
    pub fn role_id(&self) -> Option<&str> {
        self.config
            .role_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}
