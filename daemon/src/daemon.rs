//! Wires the watchers together and runs them until shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::Config;
use crate::dedup::DedupCache;
use crate::error::Error;
use crate::notifier::Notifier;
use crate::recency::RecencyGate;
use crate::shutdown::Shutdown;
use crate::users::{JsonStateFile, UserAttributionStore};
use crate::watcher::{
    spawn_file_watcher, spawn_tail, ChangeEvaluator, EventPipeline, LogParser, Track, WatchStats,
};

pub const LOGIN_LABEL: &str = "Login Track";
pub const LOGOUT_LABEL: &str = "Logout Track";

/// Handles of the running watchers.
pub struct Running {
    tails: Vec<JoinHandle<()>>,
    file_watch: Option<JoinHandle<WatchStats>>,
    users: Arc<UserAttributionStore>,
}

impl Running {
    pub fn users(&self) -> &Arc<UserAttributionStore> {
        &self.users
    }

    /// Wait for every watcher to unwind after shutdown was triggered.
    pub async fn join(self) -> Result<Option<WatchStats>, Error> {
        for tail in self.tails {
            tail.await?;
        }
        match self.file_watch {
            Some(handle) => Ok(Some(handle.await?)),
            None => Ok(None),
        }
    }
}

/// Start both trace tails and, if configured, the file watcher.
///
/// Must be called inside a tokio runtime. A file watch that cannot be set up
/// is logged and skipped; the trace tails still run.
pub fn start(
    config: &Config,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    shutdown: &Shutdown,
) -> Running {
    let users = Arc::new(UserAttributionStore::open(
        Box::new(JsonStateFile::new(&config.state_file)),
        clock.clone(),
    ));
    let dedup = Arc::new(DedupCache::new(config.dedup_window(), clock.clone()));

    let pipeline = Arc::new(EventPipeline::new(
        LogParser::new(&config.timestamp_layout),
        RecencyGate::new(config.recency_threshold(), clock.clone()),
        dedup,
        users.clone(),
        notifier.clone(),
        &config.vm_name,
    ));

    let tails = vec![
        spawn_tail(
            &config.login_trace_file,
            LOGIN_LABEL,
            Track::Login,
            pipeline.clone(),
            config.tail_poll_interval(),
            shutdown.subscribe(),
        ),
        spawn_tail(
            &config.logout_trace_file,
            LOGOUT_LABEL,
            Track::Logout,
            pipeline,
            config.tail_poll_interval(),
            shutdown.subscribe(),
        ),
    ];

    let file_watch = if config.file_watch_enabled() {
        info!(path = %config.watched_file.display(), "Starting file watcher");
        let evaluator = ChangeEvaluator::new(
            &config.watched_file,
            users.clone(),
            notifier,
            clock,
            &config.vm_name,
        );
        match spawn_file_watcher(evaluator, config.debounce(), shutdown.subscribe()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(path = %config.watched_file.display(), error = %e, "Could not start file watcher");
                None
            }
        }
    } else {
        info!("External file monitoring disabled (no path configured)");
        None
    };

    Running {
        tails,
        file_watch,
        users,
    }
}
