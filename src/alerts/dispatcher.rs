use crate::alerts::embedded::{parse_embedded, EmbeddedError};
use crate::alerts::notifier::Notifier;
use crate::alerts::throttle_store::ThrottleStore;
use crate::alerts::user_lookup::{UserLookup, UNKNOWN_USER};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::StoreError;
use crate::record::{Endpoint, LogRecord, SOURCE_FILE_FIELD, USER_FIELD};
use log::{debug, error, info, warn};

/// Placeholder for a side of the connection that could not be determined
pub const UNKNOWN: &str = "UNKNOWN";

const TS_FIELD: &str = "ts";
const ORIG_HOST_FIELD: &str = "id.orig_h";
const ORIG_PORT_FIELD: &str = "id.orig_p";
const RESP_HOST_FIELD: &str = "id.resp_h";
const RESP_PORT_FIELD: &str = "id.resp_p";

/// Escape sequences the sensor writes for newline and tab; the braced
/// forms wrap multi-line values and must go before the bare newline
const SENSOR_ESCAPES: [&str; 4] = ["{\\x0a", "\\x0a}", "\\x0a", "\\x09"];

/// Result of splitting a connection into its local and remote sides
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// One of the connection fields is missing from the record
    Missing,
    /// Exactly one side matched a local prefix
    Resolved { local: Endpoint, remote: Endpoint },
    /// Both sides or neither side matched; endpoints stay in field order
    Ambiguous { origin: Endpoint, response: Endpoint },
}

impl Classification {
    /// `(local, remote)` endpoints, with ambiguous records read in
    /// `(origin, response)` order
    pub fn endpoints(&self) -> (Option<&Endpoint>, Option<&Endpoint>) {
        match self {
            Classification::Missing => (None, None),
            Classification::Resolved { local, remote } => (Some(local), Some(remote)),
            Classification::Ambiguous { origin, response } => (Some(origin), Some(response)),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Classification::Ambiguous { .. })
    }
}

/// Split a record's connection into local and remote endpoints
///
/// # Arguments
///
/// * `record` - The record to classify
/// * `local_prefixes` - Address prefixes that mark an address as local
///
/// # Returns
///
/// `Classification::Missing` unless the record carries the timestamp and
/// both hosts and ports.
pub fn classify(record: &LogRecord, local_prefixes: &[String]) -> Classification {
    let fields = (
        record.get(TS_FIELD),
        record.get(ORIG_HOST_FIELD),
        record.get(ORIG_PORT_FIELD),
        record.get(RESP_HOST_FIELD),
        record.get(RESP_PORT_FIELD),
    );
    let (ts, orig_h, orig_p, resp_h, resp_p) = match fields {
        (Some(ts), Some(orig_h), Some(orig_p), Some(resp_h), Some(resp_p)) => {
            (ts, orig_h, orig_p, resp_h, resp_p)
        }
        _ => return Classification::Missing,
    };

    let origin = Endpoint::new(ts, orig_h, orig_p);
    let response = Endpoint::new(ts, resp_h, resp_p);

    let is_local = |address: &str| local_prefixes.iter().any(|p| address.starts_with(p.as_str()));
    match (is_local(orig_h), is_local(resp_h)) {
        (true, false) => Classification::Resolved {
            local: origin,
            remote: response,
        },
        (false, true) => Classification::Resolved {
            local: response,
            remote: origin,
        },
        _ => Classification::Ambiguous { origin, response },
    }
}

/// Category tag of a record: its file name up to the first `.`
///
/// `/logs/2024-01-03/alert.1620000000.log.gz` yields `alert`.
pub fn derive_category(record: &LogRecord) -> Option<String> {
    let name = record.source_file().file_name()?.to_str()?;
    let category = name.split('.').next().unwrap_or(name);
    if category.is_empty() {
        None
    } else {
        Some(category.to_string())
    }
}

/// Notification subject line
pub fn format_subject(category: Option<&str>, remote: Option<&str>) -> String {
    format!(
        "{} hit for IP: {}",
        category.unwrap_or(UNKNOWN).to_uppercase(),
        remote.unwrap_or(UNKNOWN)
    )
}

/// Notification body: one aligned `name = value` line per field
///
/// Header fields come first in header order with `-` for absent values,
/// followed by embedded fields, the source file and the user.
pub fn format_body(record: &LogRecord) -> String {
    let mut lines: Vec<(&str, String)> = record
        .header_fields()
        .map(|(name, value)| (name, value.unwrap_or("-").to_string()))
        .collect();
    lines.extend(
        record
            .derived_fields()
            .map(|(name, value)| (name, value.to_string())),
    );
    lines.push((
        SOURCE_FILE_FIELD,
        record.source_file().display().to_string(),
    ));
    lines.push((USER_FIELD, record.user().unwrap_or("-").to_string()));

    let width = lines.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    lines
        .iter()
        .map(|(name, value)| format!("{:<width$} = {}\n", name, strip_escapes(value), width = width))
        .collect()
}

fn strip_escapes(value: &str) -> String {
    SENSOR_ESCAPES
        .iter()
        .fold(value.to_string(), |acc, escape| acc.replace(escape, ""))
}

/// What happened to a single record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Notification handed to the notifier successfully
    Sent,
    /// Already notified within the throttle window
    Suppressed,
    /// Embedded metadata was malformed; nothing was sent
    Skipped,
    /// The notifier reported a failure
    SendFailed,
}

/// Per-run counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub sent: usize,
    pub suppressed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Records whose local side could not be told apart from the remote side
    pub ambiguous: usize,
}

impl DispatchStats {
    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Sent => self.sent += 1,
            DispatchOutcome::Suppressed => self.suppressed += 1,
            DispatchOutcome::Skipped => self.skipped += 1,
            DispatchOutcome::SendFailed => self.failed += 1,
        }
    }
}

/// Turns parsed records into throttled notifications
///
/// Each record is enriched with embedded metadata and a user identity,
/// keyed on `(remote address, category)`, and sent unless the throttle
/// store has already seen that pair inside its window. Per-record problems
/// are logged and counted; only [`finish`](AlertDispatcher::finish) can fail.
pub struct AlertDispatcher<C: Clock = SystemClock> {
    local_prefixes: Vec<String>,
    recipients: Vec<String>,
    embedded_field: String,
    store: ThrottleStore<C>,
    notifier: Box<dyn Notifier>,
    user_lookup: Box<dyn UserLookup>,
    stats: DispatchStats,
}

impl<C: Clock> AlertDispatcher<C> {
    /// Create a dispatcher for one run
    ///
    /// # Arguments
    ///
    /// * `config` - Supplies local prefixes, recipients and the embedded field name
    /// * `store` - Throttle store, already set up
    /// * `notifier` - Delivery channel for alerts
    /// * `user_lookup` - Identity lookup for the local endpoint
    pub fn new(
        config: &Config,
        store: ThrottleStore<C>,
        notifier: Box<dyn Notifier>,
        user_lookup: Box<dyn UserLookup>,
    ) -> Self {
        Self {
            local_prefixes: config.local_prefixes.clone(),
            recipients: config.mailing_list.clone(),
            embedded_field: config.embedded_field.clone(),
            store,
            notifier,
            user_lookup,
            stats: DispatchStats::default(),
        }
    }

    /// Classify, enrich, throttle and notify for one record
    ///
    /// The record is updated in place with embedded fields and the `user`
    /// value. Never fails: malformed metadata skips the record, lookup and
    /// send failures are logged.
    pub fn report(&mut self, record: &mut LogRecord) -> DispatchOutcome {
        let outcome = self.dispatch(record);
        self.stats.record(outcome);
        outcome
    }

    fn dispatch(&mut self, record: &mut LogRecord) -> DispatchOutcome {
        if let Err(e) = self.merge_embedded(record) {
            warn!(
                "Skipping alert from {}: malformed {}: {}",
                record.source_file().display(),
                self.embedded_field,
                e
            );
            return DispatchOutcome::Skipped;
        }

        let classification = classify(record, &self.local_prefixes);
        if classification.is_ambiguous() {
            self.stats.ambiguous += 1;
            warn!(
                "Could not tell local from remote in {}; using origin/response order",
                record.source_file().display()
            );
        }
        let (local, remote) = classification.endpoints();

        let user = match local {
            Some(local) => self.lookup_user(local),
            None => UNKNOWN.to_string(),
        };
        record.set_user(user);

        let category = derive_category(record);
        let remote_address = remote.map(|e| e.address.as_str());

        if self
            .store
            .should_throttle(remote_address, category.as_deref())
        {
            return DispatchOutcome::Suppressed;
        }

        let subject = format_subject(category.as_deref(), remote_address);
        let body = format_body(record);
        match self.notifier.send(&subject, &body, &self.recipients) {
            Ok(()) => {
                info!("Sent notification: {}", subject);
                DispatchOutcome::Sent
            }
            Err(e) => {
                error!("Failed to send notification '{}': {}", subject, e);
                DispatchOutcome::SendFailed
            }
        }
    }

    fn merge_embedded(&self, record: &mut LogRecord) -> Result<(), EmbeddedError> {
        let raw = match record.get(&self.embedded_field) {
            Some(raw) if !raw.is_empty() && raw != "-" => raw.to_string(),
            _ => return Ok(()),
        };

        for (name, value) in parse_embedded(&raw)? {
            // Unset values stay absent so they never form a throttle key
            let Some(value) = value else {
                continue;
            };
            if !record.add_derived(name.as_str(), value) {
                debug!("Keeping declared value for {}", name);
            }
        }
        Ok(())
    }

    fn lookup_user(&self, local: &Endpoint) -> String {
        match self
            .user_lookup
            .lookup(&local.timestamp, &local.address, &local.port)
        {
            Ok(user) => user,
            Err(e) => {
                warn!(
                    "User lookup failed for {}:{}: {}",
                    local.address, local.port, e
                );
                UNKNOWN_USER.to_string()
            }
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Close the throttle store and return the run's counters
    pub fn finish(self) -> Result<DispatchStats, StoreError> {
        self.store.close()?;
        Ok(self.stats)
    }
}
