//! tracewatch - remote-session and config-edit monitor for a single host.
//!
//! Tails session trace files for login/logout events, suppresses replays and
//! duplicates, and watches a configuration document for edits, sending every
//! alert to a webhook.

pub mod alert;
pub mod clock;
pub mod config;
pub mod daemon;
pub mod dedup;
pub mod diff;
pub mod error;
pub mod notifier;
pub mod recency;
pub mod shutdown;
pub mod users;
pub mod watcher;

pub use config::Config;
pub use error::Error;
