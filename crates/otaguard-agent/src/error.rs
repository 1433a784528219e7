//! Error types for the otaguard agent

use std::path::PathBuf;

use otaguard_update::TransitionReason;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("Unsupported configuration format '{0}' (expected .json, .yaml or .yml)")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No update record on flash; run `otaguard boot` first")]
    NoRecord,

    #[error("Update cycle failed: {0}")]
    CycleFailed(TransitionReason),

    #[error("Flash unavailable: {0}")]
    FlashUnavailable(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
}
