//! Validation and expiry cleanup for sensor input feeds
//!
//! Feeds are `.brodata` files the sensor loads as lookup tables. Each one
//! starts with `#separator \x09` and a `#fields` header that must declare a
//! `date_to_remove` column; every entry carries either a `%Y-%m-%d` date or
//! `never` in that column. Entries whose date has arrived are removed.

use crate::clock::{Clock, SystemClock};
use crate::error::FeedError;
use chrono::NaiveDate;
use log::{debug, info};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

pub const FEED_EXTENSION: &str = "brodata";

/// Required first line of every feed
pub const SEPARATOR_LINE: &str = "#separator \\x09";

/// Column holding each entry's expiry
pub const EXPIRY_FIELD: &str = "date_to_remove";

/// Expiry value for entries that are kept forever
pub const NEVER_EXPIRES: &str = "never";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Entry prefixes the sensor would match literally instead of as a domain
const URL_PREFIXES: [&str; 3] = ["www.", "http://", "https://"];

/// When an entry stops being valid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Never,
    On(NaiveDate),
}

impl Expiry {
    /// Parse a `date_to_remove` value
    ///
    /// # Errors
    ///
    /// Returns the chrono parse error for anything but `never` or `%Y-%m-%d`.
    pub fn parse(value: &str) -> Result<Self, chrono::ParseError> {
        if value == NEVER_EXPIRES {
            Ok(Expiry::Never)
        } else {
            NaiveDate::parse_from_str(value, DATE_FORMAT).map(Expiry::On)
        }
    }

    /// An entry is expired once its removal date is today or earlier
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        matches!(self, Expiry::On(date) if *date <= today)
    }
}

/// One data line of a feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub line: String,
    pub expiry: Expiry,
}

/// A feed file that passed every check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feed {
    pub path: PathBuf,
    /// The `#fields` line as written
    pub fields_line: String,
    /// Column names, sentinel excluded
    pub header: Vec<String>,
    pub entries: Vec<FeedEntry>,
}

/// Outcome of cleaning one feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub path: PathBuf,
    pub kept: usize,
    pub removed: Vec<String>,
}

/// Find every `.brodata` file under `root`, sorted by path
///
/// # Errors
///
/// Returns `FeedError::NotFound` if there are none.
pub fn discover_feeds(root: &Path) -> Result<Vec<PathBuf>, FeedError> {
    let mut feeds = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| {
            FeedError::NotFound(format!("cannot read feed dir {}: {}", dir.display(), e))
        })?;
        for entry in entries {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file()
                && path.extension().map_or(false, |ext| ext == FEED_EXTENSION)
            {
                feeds.push(path);
            }
        }
    }

    if feeds.is_empty() {
        return Err(FeedError::NotFound(format!(
            "no .{} files under {}",
            FEED_EXTENSION,
            root.display()
        )));
    }

    feeds.sort();
    info!("Found {} .{} files", feeds.len(), FEED_EXTENSION);
    Ok(feeds)
}

/// Validate a feed file without modifying it
///
/// # Errors
///
/// Returns `FeedError::Malformed` for a bad header, an empty line, a wrong
/// field count, an unset (`-`) field or a URL-prefixed entry, and
/// `FeedError::InvalidDate` for an unparseable `date_to_remove`.
pub fn check_feed(path: &Path) -> Result<Feed, FeedError> {
    let text = fs::read_to_string(path)?;
    let lines: Vec<&str> = text.lines().collect();
    let malformed = |line: usize, reason: String| FeedError::Malformed {
        path: path.to_path_buf(),
        line,
        reason,
    };

    match lines.first() {
        None => return Err(malformed(0, "file is empty".to_string())),
        Some(first) if *first != SEPARATOR_LINE => {
            return Err(malformed(
                1,
                format!("invalid separator line, expected {}", SEPARATOR_LINE),
            ))
        }
        Some(_) => {}
    }

    let fields_line = match lines.get(1) {
        Some(line) if line.starts_with("#fields") => *line,
        _ => return Err(malformed(2, "expected #fields line".to_string())),
    };
    let header: Vec<String> = fields_line.split('\t').skip(1).map(str::to_string).collect();
    let expiry_index = header
        .iter()
        .position(|name| name == EXPIRY_FIELD)
        .ok_or_else(|| malformed(2, format!("no {} field in header: {:?}", EXPIRY_FIELD, header)))?;

    let mut entries = Vec::with_capacity(lines.len().saturating_sub(2));
    for (offset, line) in lines.iter().enumerate().skip(2) {
        let line_number = offset + 1;

        if line.trim().is_empty() {
            return Err(malformed(line_number, "found empty line, please remove".to_string()));
        }

        let values: Vec<&str> = line.split('\t').collect();
        if values.len() != header.len() {
            return Err(malformed(
                line_number,
                format!("expected {} fields, found {}", header.len(), values.len()),
            ));
        }

        if values.iter().any(|v| *v == "-") {
            return Err(malformed(
                line_number,
                "field is '-', which the sensor reads as unset".to_string(),
            ));
        }

        if URL_PREFIXES.iter().any(|p| values[0].starts_with(p)) {
            return Err(malformed(
                line_number,
                "entry starts with www., http:// or https://, please remove it".to_string(),
            ));
        }

        let value = values[expiry_index];
        let expiry = Expiry::parse(value).map_err(|source| FeedError::InvalidDate {
            path: path.to_path_buf(),
            line: line_number,
            value: value.to_string(),
            source,
        })?;

        entries.push(FeedEntry {
            line: line.to_string(),
            expiry,
        });
    }

    debug!("Checked {}: {} entries", path.display(), entries.len());
    Ok(Feed {
        path: path.to_path_buf(),
        fields_line: fields_line.to_string(),
        header,
        entries,
    })
}

/// Removes expired entries from feed files
pub struct FeedCleaner<C: Clock = SystemClock> {
    clock: C,
}

impl<C: Clock> FeedCleaner<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    /// Drop the expired entries of one feed
    ///
    /// An unchanged feed is left alone. Otherwise the new contents are
    /// written next to it and swapped in, and the old file is kept with a
    /// `.prev` suffix.
    ///
    /// # Errors
    ///
    /// Returns any check failure before touching the file, or an IO error
    /// from the rewrite.
    pub fn clean(&self, path: &Path) -> Result<CleanReport, FeedError> {
        let feed = check_feed(path)?;
        let today = self.clock.today();

        let (expired, kept): (Vec<FeedEntry>, Vec<FeedEntry>) = feed
            .entries
            .into_iter()
            .partition(|entry| entry.expiry.is_expired(today));
        let removed: Vec<String> = expired.into_iter().map(|entry| entry.line).collect();

        if removed.is_empty() {
            info!("File unchanged: {}", path.display());
        } else {
            let mut contents = format!("{}\n{}\n", SEPARATOR_LINE, feed.fields_line);
            for entry in &kept {
                contents.push_str(&entry.line);
                contents.push('\n');
            }

            let tmp = with_suffix(path, ".tmp");
            fs::write(&tmp, contents)?;
            fs::rename(path, with_suffix(path, ".prev"))?;
            fs::rename(&tmp, path)?;

            info!("Removed {} lines from {}", removed.len(), path.display());
            for line in &removed {
                debug!("Removed: '{}'", line);
            }
        }

        Ok(CleanReport {
            path: path.to_path_buf(),
            kept: kept.len(),
            removed,
        })
    }

    /// Check every feed under `root`, clean them, then check them again
    ///
    /// No file is modified unless every feed passes the first check.
    pub fn run(&self, root: &Path) -> Result<Vec<CleanReport>, FeedError> {
        let feeds = discover_feeds(root)?;

        for path in &feeds {
            check_feed(path)?;
        }

        let reports = feeds
            .iter()
            .map(|path| self.clean(path))
            .collect::<Result<Vec<_>, _>>()?;

        for path in &feeds {
            check_feed(path)?;
        }
        Ok(reports)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
