//! Core record types for the alert pipeline
//!
//! A [`LogRecord`] is one data line of a sensor log, keyed by the field names
//! the file declared in its `#fields` header. Values are kept as raw strings;
//! a field the line did not supply is absent rather than empty.

use std::path::{Path, PathBuf};

/// Name under which the originating file is exposed by [`LogRecord::get`]
pub const SOURCE_FILE_FIELD: &str = "source_file";

/// Name under which the looked-up user is exposed by [`LogRecord::get`]
pub const USER_FIELD: &str = "user";

/// One parsed data line from a sensor log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Header-declared fields in header order; `None` when the line was short
    fields: Vec<(String, Option<String>)>,
    /// Fields added after parsing (embedded alert metadata)
    derived: Vec<(String, String)>,
    /// File the line was read from
    source_file: PathBuf,
    /// User identity attached by the dispatcher
    user: Option<String>,
}

impl LogRecord {
    /// Build a record by zipping `values` positionally against `header`
    ///
    /// Missing trailing values leave their fields absent; surplus values are
    /// dropped.
    pub fn from_values(header: &[String], values: &[&str], source_file: &Path) -> Self {
        let fields = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), values.get(i).map(|v| v.to_string())))
            .collect();

        Self {
            fields,
            derived: Vec::new(),
            source_file: source_file.to_path_buf(),
            user: None,
        }
    }

    /// Look up a field value by name
    ///
    /// Header fields take precedence over derived fields. The synthetic
    /// `source_file` and `user` fields are also answered here.
    pub fn get(&self, name: &str) -> Option<&str> {
        if let Some((_, value)) = self.fields.iter().find(|(n, _)| n == name) {
            if value.is_some() {
                return value.as_deref();
            }
        }

        if let Some((_, value)) = self.derived.iter().find(|(n, _)| n == name) {
            return Some(value.as_str());
        }

        match name {
            SOURCE_FILE_FIELD => self.source_file.to_str(),
            USER_FIELD => self.user.as_deref(),
            _ => None,
        }
    }

    /// Whether a value is available for `name`
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Header fields in declaration order
    pub fn header_fields(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_deref()))
    }

    /// Fields added after parsing, in insertion order
    pub fn derived_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.derived
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Add a derived field unless a value for `name` already exists
    ///
    /// Returns `true` if the field was added.
    pub fn add_derived(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = name.into();
        if self.has(&name) {
            return false;
        }
        self.derived.push((name, value.into()));
        true
    }

    pub fn source_file(&self) -> &Path {
        &self.source_file
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn set_user(&mut self, user: impl Into<String>) {
        self.user = Some(user.into());
    }
}

/// One side of a connection: when, where, and on which port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub timestamp: String,
    pub address: String,
    pub port: String,
}

impl Endpoint {
    pub fn new(
        timestamp: impl Into<String>,
        address: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            address: address.into(),
            port: port.into(),
        }
    }
}
