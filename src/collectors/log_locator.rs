use crate::error::LocatorError;
use log::{debug, info};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Sentinel for filenames without a rotation timestamp
const NO_TIMESTAMP: i64 = -1;

/// Resolves which rotated log shards belong to the current collection period
///
/// The log root holds one dated bucket per period (`2024-01-03/`), and every
/// bucket accumulates timestamped shards such as `alert.1620000000-1620003600.log.gz`.
/// Only the shards carrying the highest timestamp in the newest non-empty
/// bucket describe the current period.
#[derive(Debug)]
pub struct LogLocator {
    /// Category prefixes, in the order their shards are returned
    categories: Vec<String>,
    /// Extracts the rotation timestamp following the first dot
    timestamp_pattern: Regex,
    /// Accepted shape of explicitly supplied filenames
    filename_pattern: Regex,
}

impl LogLocator {
    /// Create a locator recognizing the given categories
    ///
    /// # Arguments
    ///
    /// * `categories` - Category prefixes such as `alert`, `intel`, `notice`
    pub fn new(categories: Vec<String>) -> Self {
        let alternatives = categories
            .iter()
            .map(|c| regex::escape(c))
            .collect::<Vec<_>>()
            .join("|");
        let filename_pattern = Regex::new(&format!(r"^(?:{})[^/]*\.log(?:\.gz)?$", alternatives))
            .expect("escaped category alternation is a valid pattern");

        Self {
            categories,
            timestamp_pattern: Regex::new(r"^\w+\.(\d+)").expect("valid timestamp pattern"),
            filename_pattern,
        }
    }

    /// Find the shards of the most recent collection period under `root_dir`
    ///
    /// # Errors
    ///
    /// Returns `LocatorError::NotFound` if there is no non-empty dated bucket,
    /// or if the chosen bucket holds no timestamped shard for any category.
    pub fn locate_latest(&self, root_dir: &Path) -> Result<Vec<PathBuf>, LocatorError> {
        let bucket = self.latest_bucket(root_dir)?;
        info!("Using most recent log dir: {}", bucket.display());

        let mut shards: Vec<(String, i64)> = Vec::new();
        for entry in fs::read_dir(&bucket)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let timestamp = self.shard_timestamp(&name);
            shards.push((name, timestamp));
        }
        debug!("Found {} logs in {}", shards.len(), bucket.display());

        let max_ts = shards
            .iter()
            .map(|(_, ts)| *ts)
            .max()
            .unwrap_or(NO_TIMESTAMP);
        debug!("Found max ts: {}", max_ts);

        if max_ts == NO_TIMESTAMP {
            return Err(LocatorError::NotFound(format!(
                "no timestamped logs in {}",
                bucket.display()
            )));
        }

        let mut selected = Vec::new();
        for category in &self.categories {
            let mut matches: Vec<&str> = shards
                .iter()
                .filter(|(name, ts)| *ts == max_ts && name.starts_with(category.as_str()))
                .map(|(name, _)| name.as_str())
                .collect();
            matches.sort_unstable();
            debug!("Found {} logs: {:?}", category, matches);

            selected.extend(matches.into_iter().map(|name| bucket.join(name)));
        }

        if selected.is_empty() {
            return Err(LocatorError::NotFound(format!(
                "no {} logs with timestamp {} in {}",
                self.categories.join("/"),
                max_ts,
                bucket.display()
            )));
        }

        info!("Selected {} logs for timestamp {}", selected.len(), max_ts);
        Ok(selected)
    }

    /// Check explicitly supplied log paths
    ///
    /// # Errors
    ///
    /// Returns `LocatorError::NotFound` for a path that does not exist and
    /// `LocatorError::InvalidFormat` for a filename that is not
    /// `<category>...log` or `<category>...log.gz`.
    pub fn verify(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>, LocatorError> {
        for path in paths {
            if !path.exists() {
                return Err(LocatorError::NotFound(format!(
                    "specified log does not exist: {}",
                    path.display()
                )));
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !self.filename_pattern.is_match(&name) {
                return Err(LocatorError::InvalidFormat(format!(
                    "{} (expected one of {} with a .log or .log.gz suffix)",
                    path.display(),
                    self.categories.join(", ")
                )));
            }
        }

        debug!("Verified {} logs", paths.len());
        Ok(paths.to_vec())
    }

    /// Pick the newest dated bucket that has at least one entry
    fn latest_bucket(&self, root_dir: &Path) -> Result<PathBuf, LocatorError> {
        let entries = fs::read_dir(root_dir).map_err(|e| {
            LocatorError::NotFound(format!("cannot read log dir {}: {}", root_dir.display(), e))
        })?;

        let mut buckets: Vec<(String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if Self::is_bucket_name(&name) && entry.file_type()?.is_dir() {
                buckets.push((name, entry.path()));
            }
        }

        // Zero-padded dates sort chronologically
        buckets.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        for (_, path) in buckets {
            if fs::read_dir(&path)?.next().is_some() {
                return Ok(path);
            }
            debug!("Skipping empty log dir: {}", path.display());
        }

        Err(LocatorError::NotFound(format!(
            "no non-empty dated log dir in {}",
            root_dir.display()
        )))
    }

    /// Bucket names look like `*-*-*`
    fn is_bucket_name(name: &str) -> bool {
        name.matches('-').count() >= 2
    }

    fn shard_timestamp(&self, name: &str) -> i64 {
        self.timestamp_pattern
            .captures(name)
            .and_then(|caps| caps[1].parse().ok())
            .unwrap_or(NO_TIMESTAMP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn locator() -> LogLocator {
        LogLocator::new(vec![
            "alert".to_string(),
            "intel".to_string(),
            "notice".to_string(),
        ])
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#fields\tts\n").unwrap();
        path
    }

    fn bucket(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn test_selects_newest_non_empty_bucket() {
        let root = TempDir::new().unwrap();
        let first = bucket(root.path(), "2024-01-01");
        bucket(root.path(), "2024-01-02");
        let third = bucket(root.path(), "2024-01-03");
        touch(&first, "alert.100-200.log");
        touch(&third, "alert.300-400.log");

        let logs = locator().locate_latest(root.path()).unwrap();
        assert_eq!(logs, vec![third.join("alert.300-400.log")]);
    }

    #[test]
    fn test_falls_back_when_newest_is_empty() {
        let root = TempDir::new().unwrap();
        let first = bucket(root.path(), "2024-01-01");
        bucket(root.path(), "2024-01-02");
        touch(&first, "notice.100-200.log");

        let logs = locator().locate_latest(root.path()).unwrap();
        assert_eq!(logs, vec![first.join("notice.100-200.log")]);
    }

    #[test]
    fn test_selects_max_timestamp_only() {
        let root = TempDir::new().unwrap();
        let dir = bucket(root.path(), "2024-01-03");
        touch(&dir, "alert.100-200.log");
        touch(&dir, "alert.150-250.log");
        touch(&dir, "notice.150-260.log");

        let logs = locator().locate_latest(root.path()).unwrap();
        assert_eq!(
            logs,
            vec![dir.join("alert.150-250.log"), dir.join("notice.150-260.log")]
        );
    }

    #[test]
    fn test_category_order_is_fixed() {
        let root = TempDir::new().unwrap();
        let dir = bucket(root.path(), "2024-02-10");
        touch(&dir, "notice.500-600.log.gz");
        touch(&dir, "intel.500-600.log.gz");
        touch(&dir, "alert.500-600.log.gz");
        touch(&dir, "conn.500-600.log.gz");

        let logs = locator().locate_latest(root.path()).unwrap();
        let names: Vec<_> = logs
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "alert.500-600.log.gz",
                "intel.500-600.log.gz",
                "notice.500-600.log.gz"
            ]
        );
    }

    #[test]
    fn test_untimestamped_files_never_win() {
        let root = TempDir::new().unwrap();
        let dir = bucket(root.path(), "2024-01-03");
        touch(&dir, "alert.log");
        touch(&dir, "stats-current.log");
        touch(&dir, "alert.42-43.log");

        let logs = locator().locate_latest(root.path()).unwrap();
        assert_eq!(logs, vec![dir.join("alert.42-43.log")]);
    }

    #[test]
    fn test_max_timestamp_from_other_category_yields_not_found() {
        let root = TempDir::new().unwrap();
        let dir = bucket(root.path(), "2024-01-03");
        touch(&dir, "alert.100-200.log");
        touch(&dir, "conn.900-1000.log");

        let result = locator().locate_latest(root.path());
        assert!(matches!(result, Err(LocatorError::NotFound(_))));
    }

    #[test]
    fn test_no_buckets() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("current")).unwrap();

        let result = locator().locate_latest(root.path());
        assert!(matches!(result, Err(LocatorError::NotFound(_))));
    }

    #[test]
    fn test_all_buckets_empty() {
        let root = TempDir::new().unwrap();
        bucket(root.path(), "2024-01-01");
        bucket(root.path(), "2024-01-02");

        let result = locator().locate_latest(root.path());
        assert!(matches!(result, Err(LocatorError::NotFound(_))));
    }

    #[test]
    fn test_missing_root_dir() {
        let result = locator().locate_latest(Path::new("/nonexistent/sensor/logs"));
        assert!(matches!(result, Err(LocatorError::NotFound(_))));
    }

    #[test]
    fn test_verify_accepts_valid_paths() {
        let dir = TempDir::new().unwrap();
        let plain = touch(dir.path(), "alert.100-200.log");
        let gz = touch(dir.path(), "intel.100-200.log.gz");

        let logs = locator().verify(&[plain.clone(), gz.clone()]).unwrap();
        assert_eq!(logs, vec![plain, gz]);
    }

    #[test]
    fn test_verify_missing_path() {
        let result = locator().verify(&[PathBuf::from("/nonexistent/alert.1.log")]);
        assert!(matches!(result, Err(LocatorError::NotFound(_))));
    }

    #[test]
    fn test_verify_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        for name in ["conn.100-200.log", "alert.100-200.txt", "alert.100-200.log.bz2"] {
            let path = touch(dir.path(), name);
            let result = locator().verify(&[path]);
            assert!(
                matches!(result, Err(LocatorError::InvalidFormat(_))),
                "{} should be rejected",
                name
            );
        }
    }
}
