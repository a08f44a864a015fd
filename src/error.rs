use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while selecting log files
#[derive(Error, Debug)]
pub enum LocatorError {
    #[error("No logs found: {0}")]
    NotFound(String),

    #[error("Invalid log filename: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur while parsing a log file
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Couldn't find #fields line in file: {}", .0.display())]
    MissingHeader(PathBuf),

    #[error("Failed to read {}: {source}", .path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur in the throttle store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open throttle database {}: {source}", .path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Throttle database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Date arithmetic overflowed for {0}")]
    DateOverflow(chrono::NaiveDate),
}

/// Errors that can occur when sending notifications
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Failed to send notification: {0}")]
    NotificationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur during a user-identity lookup
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("User lookup failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors found while checking or cleaning feed files
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("No feed files found: {0}")]
    NotFound(String),

    #[error("{}, line {line}: {reason}", .path.display())]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(
        "{}, line {line}: could not parse date_to_remove '{value}', expected %Y-%m-%d or 'never': {source}",
        .path.display()
    )]
    InvalidDate {
        path: PathBuf,
        line: usize,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Invalid configuration value: {0}")]
    ValidationError(String),

    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Fatal errors that abort a run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Locator(#[from] LocatorError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Too many alerts! Found {found} and the max is {max}")]
    TooManyAlerts { found: usize, max: usize },
}
