//! Trace tailing, session event extraction, and config file watching.

pub mod file_watcher;
pub mod log_parser;
pub mod pipeline;
pub mod tail;

pub use file_watcher::{spawn_file_watcher, ChangeEvaluator, Evaluation, FileSnapshot, WatchStats};
pub use log_parser::{classify, LogParser, LoginEvent, LogoutEvent, NormalizedLine, RawLine, SessionEvent};
pub use pipeline::{EventPipeline, LineOutcome, Track};
pub use tail::{spawn_tail, TailReader};
