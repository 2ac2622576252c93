//! Last-seen session user, persisted across restarts.
//!
//! Used to label alerts that carry no user of their own (config file edits).

use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::Error;

/// Returned by [`UserAttributionStore::get`] when no user was ever seen.
pub const UNKNOWN_USER: &str = "Unknown (no recent login)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub user_name: String,
    pub last_seen: DateTime<Utc>,
}

/// Durable backing for [`UserState`].
pub trait UserStatePersistence: Send + Sync {
    fn load(&self) -> Result<Option<UserState>, Error>;
    fn save(&self, state: &UserState) -> Result<(), Error>;
}

/// Pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonStateFile {
    path: PathBuf,
}

impl JsonStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl UserStatePersistence for JsonStateFile {
    fn load(&self) -> Result<Option<UserState>, Error> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, state: &UserState) -> Result<(), Error> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(state)?)?;
        Ok(())
    }
}

pub struct UserAttributionStore {
    state: RwLock<Option<UserState>>,
    /// Held across a save so writes reach disk in the order they happened.
    persist: Mutex<()>,
    persistence: Box<dyn UserStatePersistence>,
    clock: Arc<dyn Clock>,
}

impl UserAttributionStore {
    /// Create the store, restoring any previously persisted user.
    pub fn open(persistence: Box<dyn UserStatePersistence>, clock: Arc<dyn Clock>) -> Self {
        let state = match persistence.load() {
            Ok(Some(state)) => {
                info!(
                    user = %state.user_name,
                    last_seen = %state.last_seen.to_rfc3339_opts(SecondsFormat::Secs, true),
                    "Restored last session user"
                );
                Some(state)
            }
            Ok(None) => {
                info!("No previous user state found");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to load user state");
                None
            }
        };

        Self {
            state: RwLock::new(state),
            persist: Mutex::new(()),
            persistence,
            clock,
        }
    }

    /// Record `user_name` as seen now and persist it.
    ///
    /// The durable record is always the newest in-memory state: each save
    /// re-reads the state under the persistence lock, so a slow earlier save
    /// can never land after a later one. A failed save is logged; the
    /// in-memory value still wins.
    pub fn set(&self, user_name: &str) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            *state = Some(UserState {
                user_name: user_name.to_string(),
                last_seen: self.clock.now(),
            });
        }

        let _persist = self.persist.lock().unwrap_or_else(|e| e.into_inner());
        let Some(current) = self.state() else {
            return;
        };
        if let Err(e) = self.persistence.save(&current) {
            warn!(user = %current.user_name, error = %e, "Failed to save user state");
        }
    }

    /// The last user, with an age note once older than a day.
    pub fn get(&self) -> String {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let Some(state) = state.as_ref() else {
            return UNKNOWN_USER.to_string();
        };

        let age = self.clock.now() - state.last_seen;
        if age > Duration::hours(24) {
            format!("{} (last seen {} ago)", state.user_name, format_age(age))
        } else {
            state.user_name.clone()
        }
    }

    pub fn state(&self) -> Option<UserState> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// `~N hours` below two days, `~N days` from there on.
fn format_age(age: Duration) -> String {
    if age < Duration::minutes(1) {
        "just now".to_string()
    } else if age < Duration::hours(1) {
        format!("~{} minutes", age.num_minutes())
    } else if age < Duration::hours(48) {
        format!("~{} hours", age.num_hours())
    } else {
        format!("~{} days", age.num_days())
    }
}
