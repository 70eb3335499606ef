//! Backend Errors
//!
//! One error enum per layer. The `Display` text of each variant is the
//! message that ends up in a status event, so keep it readable.

use std::path::PathBuf;

use thiserror::Error;

/// Settings and endpoint errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid backend URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Failed to read settings {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse settings {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Unknown backend strategy '{0}' (expected 'process' or 'embedded')")]
    UnknownStrategy(String),
    #[error("The embedded strategy needs a build with the 'python' feature")]
    EmbeddedUnavailable,
}

/// Out-of-process backend errors
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn backend {path:?}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Backend exited during startup ({0})")]
    ExitedDuringStart(String),
}

/// Embedded runtime errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("No compatible Python runtime found. Install Python 3 or set {0} to a Python environment")]
    RuntimeNotFound(&'static str),
    #[error("Failed to initialize runtime: {0}")]
    Init(String),
    #[error("Failed to load backend module '{module}': {reason}")]
    ModuleLoad { module: String, reason: String },
    #[error("{0} missing")]
    EntryMissing(String),
    #[error("{entry} failed: {reason}")]
    CallFailed { entry: String, reason: String },
    #[error("Unexpected result shape: {0}")]
    BadShape(String),
    #[error("Not ready")]
    NotReady,
}
