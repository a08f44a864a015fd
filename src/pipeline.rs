//! One batch run: locate logs, parse them, dispatch alerts
//!
//! Every selected file is parsed before anything is sent, so a parse failure
//! or an alert flood aborts the run without a single notification going out.

use crate::alerts::AlertDispatcher;
use crate::clock::Clock;
use crate::collectors::{Decompressor, FileDecompressor, LogLocator, RecordParser};
use crate::config::Config;
use crate::error::{LocatorError, ParseError, PipelineError};
use crate::record::LogRecord;
use log::{debug, info};
use std::fmt;
use std::path::PathBuf;

/// Which log files a run processes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSelection {
    /// Newest shards under the configured log directory
    Latest,
    /// Files named on the command line
    Explicit(Vec<PathBuf>),
}

/// Counts for a completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub files: usize,
    pub records: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub ambiguous: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} files, {} records: {} sent, {} suppressed, {} skipped, {} failed ({} ambiguous)",
            self.files,
            self.records,
            self.sent,
            self.suppressed,
            self.skipped,
            self.failed,
            self.ambiguous
        )
    }
}

/// Wires the locator, parser and dispatcher together for a run
pub struct Pipeline<'a, D: Decompressor = FileDecompressor> {
    config: &'a Config,
    locator: LogLocator,
    parser: RecordParser<D>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self::with_parser(config, RecordParser::default())
    }
}

impl<'a, D: Decompressor> Pipeline<'a, D> {
    /// Create a pipeline reading files through a custom parser
    pub fn with_parser(config: &'a Config, parser: RecordParser<D>) -> Self {
        Self {
            config,
            locator: LogLocator::new(config.categories.clone()),
            parser,
        }
    }

    /// Resolve a selection to concrete file paths
    ///
    /// # Errors
    ///
    /// Returns `LocatorError` if no current logs exist or an explicit path is
    /// missing or misnamed.
    pub fn select(&self, selection: &LogSelection) -> Result<Vec<PathBuf>, LocatorError> {
        match selection {
            LogSelection::Latest => self.locator.locate_latest(&self.config.log_dir),
            LogSelection::Explicit(paths) => self.locator.verify(paths),
        }
    }

    /// Parse every file, in order, into one list of records
    ///
    /// # Errors
    ///
    /// Returns the first `ParseError` encountered.
    pub fn collect(&self, files: &[PathBuf]) -> Result<Vec<LogRecord>, ParseError> {
        let mut records = Vec::new();
        for file in files {
            let parsed = self.parser.parse(file)?;
            debug!("Parsed {} records from {}", parsed.len(), file.display());
            records.extend(parsed);
        }
        Ok(records)
    }

    /// Execute a full run with the given dispatcher
    ///
    /// # Arguments
    ///
    /// * `selection` - Which log files to process
    /// * `dispatcher` - Dispatcher owning the throttle store for this run
    ///
    /// # Returns
    ///
    /// A summary of what happened to every record
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::TooManyAlerts` if the run yields more records
    /// than `max_alerts`, and propagates locator, parse and store failures.
    pub fn run<C: Clock>(
        &self,
        selection: &LogSelection,
        mut dispatcher: AlertDispatcher<C>,
    ) -> Result<RunSummary, PipelineError> {
        let files = self.select(selection)?;
        info!("Processing {} log files", files.len());

        let mut records = self.collect(&files)?;
        if records.len() > self.config.max_alerts {
            return Err(PipelineError::TooManyAlerts {
                found: records.len(),
                max: self.config.max_alerts,
            });
        }

        for record in records.iter_mut() {
            dispatcher.report(record);
        }

        let stats = dispatcher.finish()?;
        let summary = RunSummary {
            files: files.len(),
            records: records.len(),
            sent: stats.sent,
            suppressed: stats.suppressed,
            skipped: stats.skipped,
            failed: stats.failed,
            ambiguous: stats.ambiguous,
        };
        info!("Run complete: {}", summary);
        Ok(summary)
    }
}
