/// Error types for every stage of a run
pub mod error;

/// Parsed log records and connection endpoints
pub mod record;

/// Calendar clock for throttle expiry
pub mod clock;

/// Configuration management
pub mod config;

/// Log discovery, parsing and feed maintenance
pub mod collectors;

/// Throttling, notification and user lookup
pub mod alerts;

/// One batch run from log selection to dispatch
pub mod pipeline;

// Re-export commonly used types
pub use alerts::{AlertDispatcher, ThrottleStore};
pub use collectors::{FeedCleaner, LogLocator, RecordParser};
pub use config::Config;
pub use error::{
    ConfigError, FeedError, LocatorError, LookupError, NotifyError, ParseError, PipelineError,
    StoreError,
};
pub use pipeline::{LogSelection, Pipeline, RunSummary};
pub use record::{Endpoint, LogRecord};
