//! Shared per-line handling: parse, classify, recency gate, dedup, dispatch.

use std::sync::Arc;

use chrono::SecondsFormat;
use tracing::{debug, error, info};

use crate::alert;
use crate::dedup::{DedupCache, DedupKey};
use crate::notifier::Notifier;
use crate::recency::RecencyGate;
use crate::users::UserAttributionStore;
use crate::watcher::log_parser::{classify, LogParser, RawLine, SessionEvent};

/// What happened to one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// No timestamp, no session pattern, or an event the track does not handle.
    Ignored,
    LoginNotified,
    LoginDuplicate,
    LoginStale,
    LogoutNotified,
    LogoutStale,
    DeliveryFailed,
}

/// Which trace a line came from. Each track only acts on its own event kind:
/// logins on the login trace, session closes on the logout trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Track {
    Login,
    Logout,
}

impl Track {
    fn accepts(self, event: &SessionEvent) -> bool {
        matches!(
            (self, event),
            (Track::Login, SessionEvent::Login(_)) | (Track::Logout, SessionEvent::Logout(_))
        )
    }
}

pub struct EventPipeline {
    parser: LogParser,
    gate: RecencyGate,
    dedup: Arc<DedupCache>,
    users: Arc<UserAttributionStore>,
    notifier: Arc<dyn Notifier>,
    vm_name: String,
}

impl EventPipeline {
    pub fn new(
        parser: LogParser,
        gate: RecencyGate,
        dedup: Arc<DedupCache>,
        users: Arc<UserAttributionStore>,
        notifier: Arc<dyn Notifier>,
        vm_name: impl Into<String>,
    ) -> Self {
        Self {
            parser,
            gate,
            dedup,
            users,
            notifier,
            vm_name: vm_name.into(),
        }
    }

    pub async fn handle_line(&self, line: &RawLine, track: Track) -> LineOutcome {
        let Some(normalized) = self.parser.parse(&line.text) else {
            return LineOutcome::Ignored;
        };

        let event = match classify(&normalized, &line.source) {
            Some(event) if track.accepts(&event) => Some(event),
            Some(_) => {
                debug!(label = %line.source, ?track, "Event kind not handled on this track");
                return LineOutcome::Ignored;
            }
            None => None,
        };

        match event {
            Some(SessionEvent::Login(event)) => {
                // Every sighting refreshes attribution, recent or not.
                self.users.set(&event.user_name);

                if !self.gate.is_recent(event.timestamp) {
                    info!(
                        label = %event.source,
                        log_time = %event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                        "Skipped old session request"
                    );
                    return LineOutcome::LoginStale;
                }

                if !self.dedup.should_notify(&DedupKey::from(&event)) {
                    info!(
                        user = %event.user_name,
                        id = %event.user_id,
                        "Skipped duplicate session request notification"
                    );
                    return LineOutcome::LoginDuplicate;
                }

                let msg = alert::login_message(&self.vm_name, &event);
                info!(user = %event.user_name, id = %event.user_id, label = %event.source, "Sending login alert");
                self.dispatch(&msg, LineOutcome::LoginNotified).await
            }
            Some(SessionEvent::Logout(event)) => {
                if !self.gate.is_recent(event.timestamp) {
                    info!(
                        label = %event.source,
                        log_time = %event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                        "Skipped old logout event"
                    );
                    return LineOutcome::LogoutStale;
                }

                let msg = alert::logout_message(&self.vm_name, &event);
                info!(label = %event.source, "Sending logout alert");
                self.dispatch(&msg, LineOutcome::LogoutNotified).await
            }
            None => {
                debug!(label = %line.source, "No session event in line");
                LineOutcome::Ignored
            }
        }
    }

    async fn dispatch(&self, msg: &str, on_success: LineOutcome) -> LineOutcome {
        match self.notifier.deliver(msg).await {
            Ok(()) => on_success,
            Err(e) => {
                error!(error = %e, "Failed to deliver alert");
                LineOutcome::DeliveryFailed
            }
        }
    }
}
