/// Validation and expiry cleanup for `.brodata` feeds
pub mod feed_cleaner;

/// Log file discovery in the dated rotation tree
pub mod log_locator;

/// Header-declared log parsing
pub mod record_parser;

pub use feed_cleaner::{check_feed, discover_feeds, CleanReport, FeedCleaner};
pub use log_locator::LogLocator;
pub use record_parser::{Decompressor, FileDecompressor, RecordParser};
