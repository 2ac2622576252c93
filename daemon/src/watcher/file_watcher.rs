//! Watches one configuration document and reports edits as structural diffs.
//!
//! `notify-debouncer-mini` coalesces bursts of filesystem events; each
//! debounced batch touching the file triggers one evaluation. The file is
//! then hashed: an unchanged hash is dropped, a changed one is diffed
//! against the last evaluated content and dispatched.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEvent};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alert;
use crate::clock::Clock;
use crate::diff;
use crate::error::Error;
use crate::notifier::Notifier;
use crate::shutdown::ShutdownSignal;
use crate::users::UserAttributionStore;

/// Hash and text of the last evaluated file content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSnapshot {
    pub hash: String,
    pub content: String,
}

impl FileSnapshot {
    fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            hash: hex::encode(Sha256::digest(bytes)),
            content: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn capture(path: &Path) -> Result<Self, Error> {
        Ok(Self::from_bytes(&std::fs::read(path)?))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Same bytes as the last evaluation (e.g. a metadata-only touch).
    Unchanged,
    Changed { diff: String, delivered: bool },
    ReadFailed,
}

/// Owns the snapshot of the watched file and turns changes into alerts.
pub struct ChangeEvaluator {
    path: PathBuf,
    snapshot: FileSnapshot,
    users: Arc<UserAttributionStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    vm_name: String,
}

impl ChangeEvaluator {
    /// Capture the starting snapshot. An unreadable file starts empty, so
    /// the first real write reports everything as added.
    pub fn new(
        path: impl Into<PathBuf>,
        users: Arc<UserAttributionStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        vm_name: impl Into<String>,
    ) -> Self {
        let path = path.into();
        let snapshot = match FileSnapshot::capture(&path) {
            Ok(snapshot) => {
                info!(path = %path.display(), bytes = snapshot.content.len(), "Initial file content captured");
                snapshot
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read watched file, starting from empty");
                FileSnapshot::default()
            }
        };

        Self {
            path,
            snapshot,
            users,
            notifier,
            clock,
            vm_name: vm_name.into(),
        }
    }

    pub fn snapshot(&self) -> &FileSnapshot {
        &self.snapshot
    }

    async fn read_current(&self) -> Result<FileSnapshot, Error> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || FileSnapshot::capture(&path)).await?
    }

    pub async fn evaluate(&mut self) -> Evaluation {
        let current = match self.read_current().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Error reading watched file");
                return Evaluation::ReadFailed;
            }
        };

        if current.hash == self.snapshot.hash {
            debug!(path = %self.path.display(), "File hash unchanged, ignoring event");
            return Evaluation::Unchanged;
        }

        info!(path = %self.path.display(), "File content changed, generating diff");
        let diff = diff::change_report(&self.snapshot.content, &current.content);
        let user = self.users.get();
        let msg = alert::file_change_message(&self.vm_name, &self.path, &user, self.clock.now(), &diff);

        let delivered = match self.notifier.deliver(&msg).await {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to deliver file change alert");
                false
            }
        };

        self.snapshot = current;
        Evaluation::Changed { diff, delivered }
    }
}

/// Counters returned when the watch loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub evaluations: usize,
    pub changes: usize,
    pub delivery_failures: usize,
}

/// Evaluate once per debounced trigger, until shutdown or until the trigger
/// source goes away. Triggers that queued up meanwhile collapse into the
/// next evaluation.
pub async fn run_change_loop(
    mut triggers: mpsc::Receiver<()>,
    mut evaluator: ChangeEvaluator,
    mut shutdown: ShutdownSignal,
) -> WatchStats {
    let mut stats = WatchStats::default();

    loop {
        tokio::select! {
            trigger = triggers.recv() => {
                if trigger.is_none() {
                    break;
                }
                while triggers.try_recv().is_ok() {}
            }
            _ = shutdown.wait() => break,
        }

        stats.evaluations += 1;
        tokio::select! {
            evaluation = evaluator.evaluate() => {
                if let Evaluation::Changed { delivered, .. } = evaluation {
                    stats.changes += 1;
                    if !delivered {
                        stats.delivery_failures += 1;
                    }
                }
            }
            _ = shutdown.wait() => break,
        }
    }

    info!(path = %evaluator.path.display(), evaluations = stats.evaluations, changes = stats.changes, "File watcher stopped");
    stats
}

fn touches_file(events: &[DebouncedEvent], file_name: &OsStr) -> bool {
    events.iter().any(|e| e.path.file_name() == Some(file_name))
}

/// Watch `evaluator`'s file and run the change loop in the background.
///
/// The parent directory is watched so editors that replace the file, and a
/// file that does not exist yet, are both handled.
pub fn spawn_file_watcher(
    evaluator: ChangeEvaluator,
    debounce: Duration,
    shutdown: ShutdownSignal,
) -> Result<JoinHandle<WatchStats>, Error> {
    let path = evaluator.path.clone();
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .ok_or_else(|| Error::NoParentDir(path.clone()))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => return Err(Error::NoParentDir(path.clone())),
    };

    let (tx, rx) = mpsc::channel::<()>(1);
    let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| match result {
        Ok(events) if touches_file(&events, &file_name) => {
            // A full queue already guarantees a pending evaluation.
            let _ = tx.try_send(());
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "File watcher error"),
    })?;
    debouncer.watcher().watch(&parent, RecursiveMode::NonRecursive)?;

    info!(path = %path.display(), debounce_ms = debounce.as_millis() as u64, "Started monitoring file");

    Ok(tokio::spawn(async move {
        // Keep the OS watch alive for the lifetime of the loop.
        let _debouncer = debouncer;
        run_change_loop(rx, evaluator, shutdown).await
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::shutdown::Shutdown;
    use crate::watcher::pipeline::tests::{NoPersistence, RecordingNotifier};
    use chrono::{TimeZone, Utc};

    struct Fixture {
        _dir: tempfile::TempDir,
        path: PathBuf,
        users: Arc<UserAttributionStore>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<dyn Clock>,
    }

    fn fixture(initial: Option<&str>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.yml");
        if let Some(content) = initial {
            std::fs::write(&path, content).unwrap();
        }
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
        ));
        Fixture {
            _dir: dir,
            path,
            users: Arc::new(UserAttributionStore::open(Box::new(NoPersistence), clock.clone())),
            notifier: Arc::new(RecordingNotifier::default()),
            clock,
        }
    }

    fn evaluator(f: &Fixture) -> ChangeEvaluator {
        ChangeEvaluator::new(
            &f.path,
            f.users.clone(),
            f.notifier.clone(),
            f.clock.clone(),
            "vm-test",
        )
    }

    #[tokio::test]
    async fn touch_without_change_sends_nothing() {
        let f = fixture(Some("a: 1\n"));
        let mut ev = evaluator(&f);
        let before = ev.snapshot().clone();

        std::fs::write(&f.path, "a: 1\n").unwrap();
        assert_eq!(ev.evaluate().await, Evaluation::Unchanged);
        assert_eq!(ev.snapshot(), &before);
        assert!(f.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn change_is_diffed_attributed_and_remembered() {
        let f = fixture(Some("a: 1\nnested:\n  b: x\n"));
        f.users.set("alice");
        let mut ev = evaluator(&f);

        std::fs::write(&f.path, "a: 1\nnested:\n  b: y\n").unwrap();
        match ev.evaluate().await {
            Evaluation::Changed { diff, delivered } => {
                assert!(delivered);
                assert_eq!(diff, "nested:\n- b: x\n+ b: y\n");
            }
            other => panic!("expected change, got {other:?}"),
        }

        {
            let sent = f.notifier.sent.lock().unwrap();
            assert_eq!(sent.len(), 1);
            assert!(sent[0].contains("Modified by: alice"));
            assert!(sent[0].contains("vm-test"));
            assert!(sent[0].contains("2025-01-01T12:00:00Z"));
            assert!(sent[0].contains("+ b: y"));
        }
        assert_eq!(ev.snapshot().content, "a: 1\nnested:\n  b: y\n");
        assert_eq!(ev.evaluate().await, Evaluation::Unchanged);
    }

    #[tokio::test]
    async fn missing_at_startup_reports_everything_added() {
        let f = fixture(None);
        let mut ev = evaluator(&f);
        assert_eq!(ev.snapshot(), &FileSnapshot::default());
        assert_eq!(ev.evaluate().await, Evaluation::ReadFailed);

        std::fs::write(&f.path, "user: bob\n").unwrap();
        let evaluation = ev.evaluate().await;
        assert!(matches!(
            evaluation,
            Evaluation::Changed { ref diff, .. } if diff == "+ user: bob\n"
        ));
        let sent = f.notifier.sent.lock().unwrap();
        assert!(sent[0].contains(crate::users::UNKNOWN_USER));
    }

    #[tokio::test]
    async fn malformed_document_reports_parse_error() {
        let f = fixture(Some("a: 1\n"));
        let mut ev = evaluator(&f);

        std::fs::write(&f.path, "a: [broken\n").unwrap();
        match ev.evaluate().await {
            Evaluation::Changed { diff, .. } => assert!(diff.contains("error parsing"), "{diff}"),
            other => panic!("expected change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn queued_triggers_collapse_into_one_evaluation() {
        let f = fixture(Some("a: 1\n"));
        std::fs::write(&f.path, "a: 2\n").unwrap();

        let (tx, rx) = mpsc::channel(8);
        for _ in 0..3 {
            tx.send(()).await.unwrap();
        }
        drop(tx);

        let shutdown = Shutdown::new();
        let stats = run_change_loop(rx, evaluator(&f), shutdown.subscribe()).await;
        assert_eq!(stats.evaluations, 1);
        assert_eq!(stats.changes, 1);
        assert_eq!(f.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn each_trigger_after_an_evaluation_evaluates_again() {
        let f = fixture(Some("a: 1\n"));
        let (tx, rx) = mpsc::channel(8);
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(run_change_loop(rx, evaluator(&f), shutdown.subscribe()));

        for (content, expected) in [("a: 2\n", 1), ("a: 3\n", 2)] {
            std::fs::write(&f.path, content).unwrap();
            tx.send(()).await.unwrap();
            let deadline = std::time::Instant::now() + Duration::from_secs(5);
            while f.notifier.sent.lock().unwrap().len() < expected && std::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
        tx.send(()).await.unwrap();
        drop(tx);

        let stats = handle.await.unwrap();
        assert_eq!(stats.evaluations, 3);
        assert_eq!(stats.changes, 2);
        assert_eq!(stats.delivery_failures, 0);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_loop() {
        let f = fixture(Some("a: 1\n"));
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(run_change_loop(rx, evaluator(&f), shutdown.subscribe()));

        shutdown.trigger();
        let stats = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, WatchStats::default());
    }

    #[tokio::test]
    async fn burst_of_writes_on_disk_is_one_alert() {
        let f = fixture(Some("a: 1\n"));
        let shutdown = Shutdown::new();
        let handle =
            spawn_file_watcher(evaluator(&f), Duration::from_millis(300), shutdown.subscribe()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        for content in ["a: 2\n", "a: 3\n", "a: 4\n"] {
            std::fs::write(&f.path, content).unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        shutdown.trigger();
        let stats = handle.await.unwrap();

        assert_eq!(stats.changes, 1);
        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("- a: 1\n+ a: 4"), "{}", sent[0]);
    }

    #[tokio::test]
    async fn real_filesystem_edit_is_reported() {
        let f = fixture(Some("a: 1\n"));
        let shutdown = Shutdown::new();
        let handle =
            spawn_file_watcher(evaluator(&f), Duration::from_millis(50), shutdown.subscribe()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&f.path, "a: 1\nb: 2\n").unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while f.notifier.sent.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        shutdown.trigger();
        let stats = handle.await.unwrap();

        assert_eq!(stats.changes, 1);
        assert!(f.notifier.sent.lock().unwrap()[0].contains("+ b: 2"));
    }
}
