//! Time-windowed suppression of repeated login alerts.
//!
//! Eviction is lazy: every `should_notify` call sweeps expired entries before
//! the lookup, so the map never holds more than the distinct keys seen within
//! one window.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::clock::Clock;
use crate::watcher::LoginEvent;

/// SHA-256 over `user|id|rfc3339-timestamp`, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(user_name: &str, user_id: &str, timestamp: DateTime<Utc>) -> Self {
        let raw = format!(
            "{}|{}|{}",
            user_name,
            user_id,
            timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        Self(hex::encode(Sha256::digest(raw.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&LoginEvent> for DedupKey {
    fn from(event: &LoginEvent) -> Self {
        Self::new(&event.user_name, &event.user_id, event.timestamp)
    }
}

pub struct DedupCache {
    window: chrono::Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<DedupKey, DateTime<Utc>>>,
}

impl DedupCache {
    pub fn new(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX),
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Check-and-set under one lock: returns true (and records now) unless
    /// `key` was notified less than one window ago.
    pub fn should_notify(&self, key: &DedupKey) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        entries.retain(|_, last| now - *last <= self.window);

        if let Some(last) = entries.get(key) {
            if now - *last < self.window {
                return false;
            }
        }

        entries.insert(key.clone(), now);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
