use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;
use chrono::Days;
use log::{debug, info, warn};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS throttle (
    identifier VARCHAR(64) NOT NULL,
    category VARCHAR(100) NOT NULL,
    expire_on DATE NOT NULL
);";

/// How long a notified pair stays suppressed
const THROTTLE_DAYS: u64 = 1;

/// Pair that a notification is deduplicated on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    /// Usually the remote address of the connection
    pub identifier: String,
    /// Category tag of the originating log
    pub category: String,
}

impl ThrottleKey {
    pub fn new(identifier: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            category: category.into(),
        }
    }
}

/// Durable, expiry-aware deduplication store
///
/// Rows live in a SQLite table; the non-expired ones are mirrored in memory
/// when the store is set up. Expired rows are purged only at setup, so a
/// decision made early in a run holds for the whole run. Uniqueness of
/// `(identifier, category)` is kept by the in-memory mirror, not the schema.
///
/// A `ThrottleStore` value only exists in the ready state: [`setup`] produces
/// it and [`close`] consumes it.
///
/// [`setup`]: ThrottleStore::setup
/// [`close`]: ThrottleStore::close
#[derive(Debug)]
pub struct ThrottleStore<C: Clock = SystemClock> {
    conn: Connection,
    active: HashSet<ThrottleKey>,
    clock: C,
    path: PathBuf,
}

impl<C: Clock> ThrottleStore<C> {
    /// Open (creating if needed) the store at `db_path`, purge expired rows,
    /// and load the rest into memory
    ///
    /// # Errors
    ///
    /// Returns `StoreError::OpenFailed` if the database cannot be opened and
    /// `StoreError::Sqlite` if creating, purging, or loading fails.
    pub fn setup(db_path: &Path, clock: C) -> Result<Self, StoreError> {
        if db_path.is_file() {
            debug!("{} exists, using it", db_path.display());
        } else {
            info!("Creating throttle database at {}", db_path.display());
        }

        let conn = Connection::open(db_path).map_err(|source| StoreError::OpenFailed {
            path: db_path.to_path_buf(),
            source,
        })?;
        conn.execute_batch(CREATE_TABLE)?;

        let today = clock.today();
        let purged = conn.execute("DELETE FROM throttle WHERE expire_on <= ?1", params![today])?;
        debug!("Removed {} expired throttle entries (today is {})", purged, today);

        let active = Self::load_active(&conn)?;
        info!(
            "Throttle store {} has {} active entries",
            db_path.display(),
            active.len()
        );

        Ok(Self {
            conn,
            active,
            clock,
            path: db_path.to_path_buf(),
        })
    }

    fn load_active(conn: &Connection) -> Result<HashSet<ThrottleKey>, StoreError> {
        let mut stmt = conn.prepare("SELECT identifier, category FROM throttle")?;
        let rows = stmt.query_map([], |row| {
            Ok(ThrottleKey {
                identifier: row.get(0)?,
                category: row.get(1)?,
            })
        })?;
        let keys = rows.collect::<Result<HashSet<_>, _>>()?;
        Ok(keys)
    }

    /// Decide whether a notification for this pair should be suppressed
    ///
    /// Returns `false` without touching the store when either half of the
    /// key is missing or empty. A pair seen for the first time is recorded with an
    /// expiry of tomorrow and allowed through; a persistence failure is
    /// logged and does not change the decision.
    pub fn should_throttle(&mut self, identifier: Option<&str>, category: Option<&str>) -> bool {
        let (identifier, category) = match (identifier, category) {
            (Some(identifier), Some(category)) if !identifier.is_empty() && !category.is_empty() => {
                (identifier, category)
            }
            _ => return false,
        };

        let key = ThrottleKey::new(identifier, category);
        if self.active.contains(&key) {
            debug!("Throttling {},{}", identifier, category);
            return true;
        }

        if let Err(e) = self.persist(&key) {
            warn!(
                "Failed to insert throttle item {},{}: {}",
                key.identifier, key.category, e
            );
        }
        self.active.insert(key);
        false
    }

    fn persist(&self, key: &ThrottleKey) -> Result<(), StoreError> {
        let today = self.clock.today();
        let expire_on = today
            .checked_add_days(Days::new(THROTTLE_DAYS))
            .ok_or(StoreError::DateOverflow(today))?;

        self.conn.execute(
            "INSERT INTO throttle (identifier, category, expire_on) VALUES (?1, ?2, ?3)",
            params![key.identifier, key.category, expire_on],
        )?;
        debug!(
            "Wrote throttle item {},{} expiring {}",
            key.identifier, key.category, expire_on
        );
        Ok(())
    }

    /// Whether the pair is currently suppressed
    pub fn contains(&self, identifier: &str, category: &str) -> bool {
        self.active.contains(&ThrottleKey::new(identifier, category))
    }

    /// Number of pairs currently suppressed
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the backing connection
    pub fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }

    #[cfg(test)]
    fn rows(&self) -> Vec<(String, String, chrono::NaiveDate)> {
        let mut stmt = self
            .conn
            .prepare("SELECT identifier, category, expire_on FROM throttle ORDER BY rowid")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn open(dir: &TempDir, clock: &MockClock) -> ThrottleStore<MockClock> {
        ThrottleStore::setup(&dir.path().join("throttle.db"), clock.clone()).unwrap()
    }

    #[test]
    fn test_creates_database_when_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("throttle.db");
        assert!(!path.exists());

        let store = ThrottleStore::setup(&path, MockClock::new(date(2024, 1, 3))).unwrap();

        assert!(path.is_file());
        assert_eq!(store.active_count(), 0);
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_first_call_allows_and_persists() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new(date(2024, 1, 3));
        let mut store = open(&dir, &clock);

        assert!(!store.should_throttle(Some("203.0.113.5"), Some("alert")));
        assert_eq!(
            store.rows(),
            vec![(
                "203.0.113.5".to_string(),
                "alert".to_string(),
                date(2024, 1, 4)
            )]
        );
    }

    #[test]
    fn test_second_call_within_window_throttles() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new(date(2024, 1, 3));
        let mut store = open(&dir, &clock);

        assert!(!store.should_throttle(Some("203.0.113.5"), Some("alert")));
        assert!(store.should_throttle(Some("203.0.113.5"), Some("alert")));
        assert_eq!(store.rows().len(), 1);
    }

    #[test]
    fn test_pairs_are_keyed_on_both_halves() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new(date(2024, 1, 3));
        let mut store = open(&dir, &clock);

        assert!(!store.should_throttle(Some("203.0.113.5"), Some("alert")));
        assert!(!store.should_throttle(Some("198.51.100.7"), Some("alert")));
        assert!(!store.should_throttle(Some("203.0.113.5"), Some("notice")));
        assert_eq!(store.active_count(), 3);
    }

    #[test]
    fn test_entries_survive_reopen_within_window() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new(date(2024, 1, 3));

        let mut store = open(&dir, &clock);
        store.should_throttle(Some("203.0.113.5"), Some("alert"));
        store.close().unwrap();

        let mut store = open(&dir, &clock);
        assert!(store.contains("203.0.113.5", "alert"));
        assert!(store.should_throttle(Some("203.0.113.5"), Some("alert")));
    }

    #[test]
    fn test_expired_entries_are_purged_on_setup() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new(date(2024, 1, 3));

        let mut store = open(&dir, &clock);
        assert!(!store.should_throttle(Some("203.0.113.5"), Some("alert")));
        store.close().unwrap();

        clock.advance_days(1);
        let mut store = open(&dir, &clock);
        assert_eq!(store.active_count(), 0);
        assert!(store.rows().is_empty());
        assert!(!store.should_throttle(Some("203.0.113.5"), Some("alert")));
    }

    #[test]
    fn test_expiry_is_not_applied_mid_run() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new(date(2024, 1, 3));
        let mut store = open(&dir, &clock);

        store.should_throttle(Some("203.0.113.5"), Some("alert"));
        clock.advance_days(5);

        assert!(store.should_throttle(Some("203.0.113.5"), Some("alert")));
    }

    #[test]
    fn test_missing_key_halves_pass_through() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new(date(2024, 1, 3));
        let mut store = open(&dir, &clock);

        assert!(!store.should_throttle(None, Some("alert")));
        assert!(!store.should_throttle(Some("203.0.113.5"), None));
        assert!(!store.should_throttle(None, None));
        // Repeats are still allowed and nothing was recorded
        assert!(!store.should_throttle(None, Some("alert")));
        assert_eq!(store.active_count(), 0);
        assert!(store.rows().is_empty());
    }

    #[test]
    fn test_empty_key_halves_pass_through() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new(date(2024, 1, 3));
        let mut store = open(&dir, &clock);

        assert!(!store.should_throttle(Some(""), Some("notice")));
        assert!(!store.should_throttle(Some(""), Some("notice")));
        assert!(!store.should_throttle(Some("203.0.113.5"), Some("")));
        assert_eq!(store.active_count(), 0);
        assert!(store.rows().is_empty());
    }

    #[test]
    fn test_insert_failure_still_allows() {
        let dir = TempDir::new().unwrap();
        let clock = MockClock::new(date(2024, 1, 3));
        let mut store = open(&dir, &clock);
        store.conn.execute_batch("DROP TABLE throttle;").unwrap();

        assert!(!store.should_throttle(Some("203.0.113.5"), Some("alert")));
        // The in-memory mirror still suppresses repeats for this run
        assert!(store.should_throttle(Some("203.0.113.5"), Some("alert")));
    }

    #[test]
    fn test_duplicate_rows_collapse_in_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("throttle.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(CREATE_TABLE).unwrap();
            for _ in 0..2 {
                conn.execute(
                    "INSERT INTO throttle VALUES ('203.0.113.5', 'alert', '2024-01-04')",
                    [],
                )
                .unwrap();
            }
        }

        let store = ThrottleStore::setup(&path, MockClock::new(date(2024, 1, 3))).unwrap();
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_setup_fails_for_unreachable_path() {
        let result = ThrottleStore::setup(
            Path::new("/nonexistent/dir/throttle.db"),
            MockClock::new(date(2024, 1, 3)),
        );
        assert!(matches!(result, Err(StoreError::OpenFailed { .. })));
    }

    #[test]
    fn test_setup_fails_for_non_database_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("throttle.db");
        std::fs::write(&path, "this is not a sqlite database, just some text padding it out")
            .unwrap();

        let result = ThrottleStore::setup(&path, MockClock::new(date(2024, 1, 3)));
        assert!(result.is_err());
    }
}

// Property-based tests
#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::NaiveDate;
    use quickcheck_macros::quickcheck;

    // Within one run, a pair is allowed exactly once no matter how often it
    // is presented
    #[quickcheck]
    fn prop_each_pair_allowed_once(events: Vec<(u8, u8)>) -> bool {
        let dir = tempfile::TempDir::new().unwrap();
        let clock = MockClock::new(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
        let mut store = ThrottleStore::setup(&dir.path().join("throttle.db"), clock).unwrap();

        let mut allowed = HashSet::new();
        for (ip, tag) in &events {
            let identifier = format!("10.0.0.{}", ip % 8);
            let category = format!("cat{}", tag % 3);
            if !store.should_throttle(Some(identifier.as_str()), Some(category.as_str()))
                && !allowed.insert((identifier, category))
            {
                return false;
            }
        }

        let distinct: HashSet<_> = events.iter().map(|(i, t)| (i % 8, t % 3)).collect();
        allowed.len() == distinct.len() && store.rows().len() == distinct.len()
    }
}
