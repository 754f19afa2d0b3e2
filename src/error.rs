//! Error taxonomy for the credential lifecycle.
//!
//! Core modules return [`Error`]; the CLI wraps it in `anyhow` for display.
//! No variant ever carries a secret value.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid password length {length} (must be between 1 and {max})")]
    InvalidLength { length: usize, max: usize },

    #[error("random source failure: {0}")]
    RandomSource(#[source] rand::Error),

    #[error("no password configuration for service '{service}' in stack '{stack}'")]
    ConfigNotFound { stack: String, service: String },

    #[error("workspace not found: no {marker} in {} or any parent directory", .start.display())]
    WorkspaceNotFound { start: PathBuf, marker: String },

    #[error("malformed '{key}' in stack '{stack}': {source}")]
    Parse {
        stack: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("secret not found: {resource}")]
    SecretNotFound { resource: String },

    #[error("cannot access secret {resource}: {message}")]
    SecretAccess { resource: String, message: String },

    #[error("secret {namespace}/{name} is not materialized yet{}", readiness_suffix(.detail))]
    MaterializationNotReady {
        namespace: String,
        name: String,
        detail: Option<String>,
    },

    #[error("secret {namespace}/{name} has no '{key}' entry")]
    MissingSecretKey {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("rotation incomplete in stack '{stack}': {}", rotation_summary(.succeeded, .failed, .skipped))]
    PartialRotationFailure {
        stack: String,
        succeeded: Vec<String>,
        failed: Vec<ServiceFailure>,
        skipped: Vec<String>,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no cloud project configured for stack '{stack}' (set config key '{key}' or [secret_manager].project)")]
    ProjectNotConfigured { stack: String, key: String },

    #[error("{program} failed: {message}")]
    Backend {
        program: String,
        transient: bool,
        message: String,
    },

    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("settings {}: {message}", .path.display())]
    Settings { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn backend(program: impl Into<String>, transient: bool, message: impl Into<String>) -> Self {
        Self::Backend {
            program: program.into(),
            transient,
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Not-found, permission, parse and validation failures are terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Backend { transient, .. } => *transient,
            _ => false,
        }
    }

    /// Whether this error means a configuration is missing.
    pub fn is_config_not_found(&self) -> bool {
        matches!(self, Self::ConfigNotFound { .. })
    }
}

/// One service that failed during a batch rotation.
#[derive(Debug)]
pub struct ServiceFailure {
    pub service: String,
    pub error: Box<Error>,
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.error)
    }
}

fn readiness_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) if !d.is_empty() => format!(" ({})", d),
        _ => " (external-secrets controller has not reconciled it)".to_string(),
    }
}

fn rotation_summary(succeeded: &[String], failed: &[ServiceFailure], skipped: &[String]) -> String {
    let failures: Vec<String> = failed.iter().map(|f| f.to_string()).collect();
    let mut out = format!(
        "{} failed [{}], {} succeeded",
        failed.len(),
        failures.join("; "),
        succeeded.len()
    );
    if !skipped.is_empty() {
        out.push_str(&format!(", {} skipped [{}]", skipped.len(), skipped.join(", ")));
    }
    out
}
