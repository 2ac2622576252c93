//! Trace line normalization and session event classification.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

/// Embedded timestamp, e.g. `2025-01-01 12:00:00.123`.
static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3}").expect("timestamp regex")
});

/// `Incoming session request: <name> (<id>)`
static LOGIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Incoming session request: (.+?) \(([^)]+)\)").expect("login regex")
});

const LOGOUT_MARKER: &str = "Session closed by";

/// A line as read from a trace file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub text: String,
    /// Which watcher produced the line (e.g. "Login Track").
    pub source: String,
}

impl RawLine {
    pub fn new(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
        }
    }
}

/// Whitespace-collapsed line text plus its embedded timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedLine {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginEvent {
    pub user_name: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutEvent {
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Login(LoginEvent),
    Logout(LogoutEvent),
}

/// Extracts timestamps from trace lines using a configured layout.
#[derive(Debug, Clone)]
pub struct LogParser {
    layout: String,
}

impl LogParser {
    pub fn new(layout: impl Into<String>) -> Self {
        Self {
            layout: layout.into(),
        }
    }

    /// Normalize `text` and extract its timestamp.
    ///
    /// Returns `None` for lines without a timestamp or whose timestamp does
    /// not parse with the layout. Most trace lines fall in that bucket, so
    /// it is not treated as an error.
    pub fn parse(&self, text: &str) -> Option<NormalizedLine> {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return None;
        }

        let stamp = TIMESTAMP_RE.find(&normalized)?;
        let timestamp = NaiveDateTime::parse_from_str(stamp.as_str(), &self.layout)
            .ok()?
            .and_utc();

        Some(NormalizedLine {
            text: normalized,
            timestamp,
        })
    }
}

/// Classify a normalized line. Login takes priority over logout.
pub fn classify(line: &NormalizedLine, source: &str) -> Option<SessionEvent> {
    if let Some(caps) = LOGIN_RE.captures(&line.text) {
        return Some(SessionEvent::Login(LoginEvent {
            user_name: caps[1].to_string(),
            user_id: caps[2].to_string(),
            timestamp: line.timestamp,
            source: source.to_string(),
        }));
    }

    if line.text.contains(LOGOUT_MARKER) {
        return Some(SessionEvent::Logout(LogoutEvent {
            timestamp: line.timestamp,
            source: source.to_string(),
        }));
    }

    None
}
