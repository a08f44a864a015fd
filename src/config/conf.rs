use crate::error::ConfigError;
use log::debug;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Runtime configuration for one batch run
///
/// Loaded once at startup and passed by reference into every stage; nothing
/// in the pipeline reads configuration from global state.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root directory holding the dated rotation buckets
    pub log_dir: PathBuf,
    /// SQLite file backing the throttle store
    pub throttle_db: PathBuf,
    /// Notification recipients
    pub mailing_list: Vec<String>,
    /// Address prefixes that identify the local side of a connection
    pub local_prefixes: Vec<String>,
    /// Abort the run when more records than this are found
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,
    /// Recognized log categories, in selection order
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Field carrying embedded alert metadata
    #[serde(default = "default_embedded_field")]
    pub embedded_field: String,
    /// Mail transport program
    #[serde(default = "default_mail_command")]
    pub mail_command: String,
    /// Program and leading arguments for user-identity lookups
    #[serde(default)]
    pub user_lookup_command: Vec<String>,
    /// Directory searched for `.brodata` feed files
    #[serde(default)]
    pub feed_dir: Option<PathBuf>,
}

fn default_max_alerts() -> usize {
    200
}

fn default_categories() -> Vec<String> {
    vec!["alert".to_string(), "intel".to_string(), "notice".to_string()]
}

fn default_embedded_field() -> String {
    "alert_record".to_string()
}

fn default_mail_command() -> String {
    "mail".to_string()
}

impl Config {
    /// Load and validate configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema, and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&contents)?;
        debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailing_list.is_empty() {
            return Err(ConfigError::ValidationError(
                "mailing_list must not be empty".to_string(),
            ));
        }

        let address = Regex::new(r"^\S+@\S+\.\S+$").expect("valid address pattern");
        if let Some(bad) = self.mailing_list.iter().find(|r| !address.is_match(r)) {
            return Err(ConfigError::ValidationError(format!(
                "invalid email address in mailing_list: {}",
                bad
            )));
        }

        if self.local_prefixes.is_empty() {
            return Err(ConfigError::ValidationError(
                "local_prefixes must not be empty".to_string(),
            ));
        }

        if self.categories.is_empty() || self.categories.iter().any(|c| c.is_empty()) {
            return Err(ConfigError::ValidationError(
                "categories must be a non-empty list of non-empty names".to_string(),
            ));
        }

        if self.max_alerts == 0 {
            return Err(ConfigError::ValidationError(
                "max_alerts must be greater than 0".to_string(),
            ));
        }

        if self.mail_command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "mail_command must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}
