//! Filter for events whose embedded timestamp is too far from "now".

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;

pub struct RecencyGate {
    threshold: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl RecencyGate {
    pub fn new(threshold: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold: chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    /// True when `|now - timestamp| <= threshold`, in either direction.
    pub fn is_recent(&self, timestamp: DateTime<Utc>) -> bool {
        (self.clock.now() - timestamp).abs() <= self.threshold
    }
}
