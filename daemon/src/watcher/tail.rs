//! Follow-mode tailing of one trace file, surviving rotation.
//!
//! The file is polled: each tick stats the path, detects truncation or
//! replacement, and reads whatever was appended since the last tick.

use std::fs::{File, Metadata};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::shutdown::ShutdownSignal;
use crate::watcher::log_parser::RawLine;
use crate::watcher::pipeline::{EventPipeline, Track};

/// Cap on bytes consumed per poll so a huge append cannot exhaust memory.
const MAX_READ_BYTES: u64 = 4 * 1024 * 1024;

/// A line longer than this without a newline is discarded.
const MAX_PARTIAL_LINE: usize = 1024 * 1024;

/// Identifies the file behind a path, so a replacement is noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileIdentity {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(not(unix))]
    created: Option<std::time::SystemTime>,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }

    #[cfg(not(unix))]
    fn of(meta: &Metadata) -> Self {
        Self {
            created: meta.created().ok(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Position {
    identity: FileIdentity,
    offset: u64,
}

/// Incremental line reader for one path.
#[derive(Debug)]
pub struct TailReader {
    path: PathBuf,
    position: Option<Position>,
    partial: Vec<u8>,
}

impl TailReader {
    /// Attach at end-of-file. A missing file is read from its start once it
    /// appears.
    pub fn open_at_end(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let position = match std::fs::metadata(&path) {
            Ok(meta) => Some(Position {
                identity: FileIdentity::of(&meta),
                offset: meta.len(),
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Trace file not available yet, waiting for it");
                None
            }
        };
        Self {
            path,
            position,
            partial: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return complete lines appended since the previous poll.
    pub fn poll(&mut self) -> Result<Vec<String>, Error> {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.position.take().is_some() {
                    info!(path = %self.path.display(), "Trace file removed, waiting for it to reappear");
                }
                self.partial.clear();
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let identity = FileIdentity::of(&meta);
        let len = meta.len();

        let mut pos = match self.position {
            None => {
                info!(path = %self.path.display(), "Trace file appeared, reading from start");
                Position {
                    identity,
                    offset: 0,
                }
            }
            Some(pos) if pos.identity != identity => {
                info!(path = %self.path.display(), "Trace file replaced, reopening");
                self.partial.clear();
                Position {
                    identity,
                    offset: 0,
                }
            }
            Some(pos) if len < pos.offset => {
                info!(path = %self.path.display(), "Trace file truncated, rewinding");
                self.partial.clear();
                Position {
                    identity,
                    offset: 0,
                }
            }
            Some(pos) => pos,
        };
        self.position = Some(pos);

        if len == pos.offset {
            return Ok(Vec::new());
        }

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(pos.offset))?;
        let mut buf = Vec::new();
        let read = file
            .take((len - pos.offset).min(MAX_READ_BYTES))
            .read_to_end(&mut buf)?;
        pos.offset += read as u64;
        self.position = Some(pos);

        self.partial.extend_from_slice(&buf);
        Ok(self.take_complete_lines())
    }

    fn take_complete_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            if self.partial.len() > MAX_PARTIAL_LINE {
                warn!(path = %self.path.display(), bytes = self.partial.len(), "Discarding oversized partial line");
                self.partial.clear();
            }
            return Vec::new();
        };

        let complete: Vec<u8> = self.partial.drain(..=last_newline).collect();
        complete
            .split(|b| *b == b'\n')
            .map(|raw| raw.strip_suffix(b"\r").unwrap_or(raw))
            .filter(|raw| !raw.is_empty())
            .map(|raw| String::from_utf8_lossy(raw).into_owned())
            .collect()
    }
}

/// Start tailing `path`, feeding every new line through `pipeline` as
/// `track` until `shutdown` fires.
pub fn spawn_tail(
    path: impl Into<PathBuf>,
    label: impl Into<String>,
    track: Track,
    pipeline: Arc<EventPipeline>,
    poll_interval: Duration,
    shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    let reader = TailReader::open_at_end(path);
    let label = label.into();
    info!(label = %label, path = %reader.path().display(), "Started monitoring");
    tokio::spawn(run_tail(reader, label, track, pipeline, poll_interval, shutdown))
}

async fn run_tail(
    mut reader: TailReader,
    label: String,
    track: Track,
    pipeline: Arc<EventPipeline>,
    poll_interval: Duration,
    mut shutdown: ShutdownSignal,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'watch: loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait() => break 'watch,
        }

        let polled = tokio::task::spawn_blocking(move || {
            let result = reader.poll();
            (reader, result)
        })
        .await;

        let lines = match polled {
            Ok((r, result)) => {
                reader = r;
                match result {
                    Ok(lines) => lines,
                    Err(e) => {
                        warn!(label = %label, error = %e, "Error reading trace file");
                        continue;
                    }
                }
            }
            Err(e) => {
                error!(label = %label, error = %e, "Tail reader task failed");
                return;
            }
        };

        for text in lines {
            let line = RawLine::new(text, label.as_str());
            tokio::select! {
                outcome = pipeline.handle_line(&line, track) => {
                    debug!(label = %label, ?outcome, "Processed line");
                }
                _ = shutdown.wait() => break 'watch,
            }
        }
    }

    info!(label = %label, "Stopped monitoring");
}
