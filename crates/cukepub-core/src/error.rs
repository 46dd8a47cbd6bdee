//! Error taxonomy for result aggregation and publishing.

use std::path::PathBuf;

use thiserror::Error;

use crate::status::Verdict;

/// Errors raised while collecting artifacts into the report directory.
///
/// Either variant is fatal to the collection step. The publisher converts it
/// into a `FAILURE` verdict and still finishes the invocation.
#[derive(Error, Debug)]
pub enum CollectError {
    /// A local file copy failed after the locator confirmed the file exists.
    #[error("failed to copy {source_path} to {target_path}: {source}")]
    Io {
        source_path: PathBuf,
        target_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The target directory could not be prepared.
    #[error("failed to prepare report directory {path}: {source}")]
    TargetDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A bulk transfer from a remote node failed.
    #[error("remote transfer of '{pattern}' from {remote} failed: {message}")]
    Transfer {
        remote: String,
        pattern: String,
        message: String,
    },
}

/// The report generator could not produce a report.
#[derive(Error, Debug)]
#[error("report generation failed: {cause}")]
pub struct GenerationFailure {
    /// Rendered error chain of the underlying failure.
    pub cause: String,
}

impl GenerationFailure {
    /// Wrap an `anyhow` error, keeping its full cause chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            cause: format!("{err:#}"),
        }
    }
}

/// The host rejected a verdict or record write.
#[derive(Error, Debug)]
pub enum HostError {
    #[error("verdict already written for build {build_id}")]
    VerdictAlreadySet { build_id: String },

    #[error("build record already attached for build {build_id}")]
    RecordAlreadyAttached { build_id: String },

    #[error("host io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("host serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by [`crate::Publisher::run`].
///
/// Collection and generation failures never appear here: they are folded into
/// the verdict. Only host write failures reach the caller.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The host rejected the verdict; the build has none.
    #[error("failed to set build verdict: {0}")]
    Verdict(#[source] HostError),

    /// The verdict was written but the build record was not attached.
    #[error("verdict {verdict} set but build record not attached: {source}")]
    Record {
        verdict: Verdict,
        #[source]
        source: HostError,
    },
}

impl PublishError {
    /// The verdict the host holds despite the error, if any.
    pub fn written_verdict(&self) -> Option<Verdict> {
        match self {
            PublishError::Verdict(_) => None,
            PublishError::Record { verdict, .. } => Some(*verdict),
        }
    }
}

/// Errors loading publisher configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The result directory cannot be resolved inside the workspace.
    #[error("invalid result directory '{dir}': {reason}")]
    InvalidSourceDir { dir: String, reason: &'static str },
}
