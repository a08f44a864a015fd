/// Throttled alert dispatch
pub mod dispatcher;

/// Parser for bracketed alert metadata carried inside a record
pub mod embedded;

/// Notification delivery
pub mod notifier;

/// Durable deduplication store
pub mod throttle_store;

/// User-identity lookups for local endpoints
pub mod user_lookup;

pub use dispatcher::{AlertDispatcher, Classification, DispatchOutcome, DispatchStats};
pub use notifier::{DryRunNotifier, MailNotifier, Notifier};
pub use throttle_store::{ThrottleKey, ThrottleStore};
pub use user_lookup::{CommandUserLookup, NoUserLookup, UserLookup};
