//! Full daemon wiring against real files, a simulated wall clock and an
//! in-memory notifier.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tracewatch::clock::ManualClock;
use tracewatch::daemon;
use tracewatch::notifier::Notifier;
use tracewatch::shutdown::Shutdown;
use tracewatch::{Config, Error};

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<String>>,
}

impl Inbox {
    fn snapshot(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for Inbox {
    async fn deliver(&self, text: &str) -> Result<(), Error> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn append(path: &Path, line: &str) {
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    writeln!(f, "{line}").unwrap();
}

async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    cond()
}

fn test_config(dir: &Path) -> Config {
    Config {
        vm_name: "vm-e2e".to_string(),
        login_trace_file: dir.join("ad.trace"),
        logout_trace_file: dir.join("ad_svc.trace"),
        app_log_file: dir.join("tracewatch.log"),
        watched_file: dir.join("user.yml"),
        state_file: dir.join("state.json"),
        tail_poll_interval_ms: 20,
        debounce_ms: 50,
        ..Config::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn login_is_alerted_once_and_duplicate_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    append(&config.login_trace_file, "2024-12-31 23:00:00.000 history that must not replay");

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap() + chrono::Duration::milliseconds(200),
    ));
    let inbox = Arc::new(Inbox::default());
    let shutdown = Shutdown::new();
    let running = daemon::start(&config, inbox.clone(), clock.clone(), &shutdown);

    let login = "2025-01-01 12:00:00.000 Incoming session request: alice (ID123)";
    append(&config.login_trace_file, login);
    assert!(wait_until(|| inbox.snapshot().len() == 1).await);

    let first = &inbox.snapshot()[0];
    assert!(first.contains("alice"));
    assert!(first.contains("ID123"));
    assert!(first.contains("vm-e2e"));
    assert_eq!(running.users().get(), "alice");

    clock.advance(chrono::Duration::seconds(1));
    append(&config.login_trace_file, login);
    let close = "2025-01-01 12:00:01.000 Session closed by peer";
    append(&config.login_trace_file, close);
    append(&config.logout_trace_file, close);
    assert!(wait_until(|| inbox.snapshot().len() == 2).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let all = inbox.snapshot();
    assert_eq!(all.len(), 2, "{all:?}");
    assert!(all[1].contains("session closed"));

    shutdown.trigger();
    running.join().await.unwrap();

    let state = std::fs::read_to_string(&config.state_file).unwrap();
    assert!(state.contains("alice"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn config_edit_is_attributed_to_last_user() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(&config.watched_file, "limits:\n  cpu: 2\n").unwrap();

    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap(),
    ));
    let inbox = Arc::new(Inbox::default());
    let shutdown = Shutdown::new();
    let running = daemon::start(&config, inbox.clone(), clock, &shutdown);
    running.users().set("bob");

    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(&config.watched_file, "limits:\n  cpu: 4\n").unwrap();
    assert!(wait_until(|| !inbox.snapshot().is_empty()).await);

    let alert = &inbox.snapshot()[0];
    assert!(alert.contains("Modified by: bob"));
    assert!(alert.contains("limits:\n- cpu: 2\n+ cpu: 4"));

    shutdown.trigger();
    let stats = running.join().await.unwrap().unwrap();
    assert_eq!(stats.changes, 1);
}
