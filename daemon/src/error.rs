//! Error types for tracewatch.

use thiserror::Error;

/// tracewatch error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook returned {0}")]
    WebhookStatus(reqwest::StatusCode),

    #[error("Webhook endpoint not configured")]
    WebhookNotConfigured,

    #[error("Document root is not a mapping")]
    NotAMapping,

    #[error("Watched path has no parent directory: {0}")]
    NoParentDir(std::path::PathBuf),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
