//! Per-invocation build context and publisher configuration.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collector::RemoteWorkspace;
use crate::error::ConfigError;
use crate::invoker::ReportPolicy;

/// Directory under the build artifacts root that receives consolidated files.
pub const REPORT_DIR_NAME: &str = "cucumber-html-reports";

/// Where the build's workspace lives relative to the publisher.
#[derive(Clone)]
pub enum Topology {
    /// The workspace is on this machine.
    Local,

    /// The workspace is on another execution node.
    Remote(Arc<dyn RemoteWorkspace>),
}

impl Topology {
    pub fn is_remote(&self) -> bool {
        matches!(self, Topology::Remote(_))
    }

    /// Short label used in logs and build records.
    pub fn label(&self) -> String {
        match self {
            Topology::Local => "local".to_string(),
            Topology::Remote(remote) => format!("remote:{}", remote.describe()),
        }
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Local => f.write_str("Local"),
            Topology::Remote(remote) => f.debug_tuple("Remote").field(&remote.describe()).finish(),
        }
    }
}

/// Immutable inputs for one publishing invocation.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Local or remote execution.
    pub topology: Topology,

    /// Workspace root on the local machine. Ignored for remote builds except
    /// in log output.
    pub workspace: PathBuf,

    /// Root directory for persisted artifacts of this build.
    pub artifacts_root: PathBuf,

    /// Host build number.
    pub build_number: u64,

    /// Host project (job) name.
    pub project_name: String,
}

impl BuildContext {
    /// Context for a build that ran on this machine.
    pub fn local(
        workspace: impl Into<PathBuf>,
        artifacts_root: impl Into<PathBuf>,
        build_number: u64,
        project_name: impl Into<String>,
    ) -> Self {
        Self {
            topology: Topology::Local,
            workspace: workspace.into(),
            artifacts_root: artifacts_root.into(),
            build_number,
            project_name: project_name.into(),
        }
    }

    /// Switch this context to a remote topology.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteWorkspace>) -> Self {
        self.topology = Topology::Remote(remote);
        self
    }

    /// Consolidated report directory for this build.
    pub fn report_dir(&self) -> PathBuf {
        self.artifacts_root.join(REPORT_DIR_NAME)
    }

    pub fn build_id(&self) -> String {
        self.build_number.to_string()
    }
}

/// Severity policy flags. Every flag is off unless set.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Count skipped steps as failures.
    pub skipped_fails: bool,

    /// Count undefined steps as failures.
    pub undefined_fails: bool,

    /// Disable rich chart rendering in the generated report.
    pub no_rich_charts: bool,

    /// Report failing scenarios as UNSTABLE instead of FAILURE.
    pub demote_failures_to_unstable: bool,
}

/// Publisher configuration supplied once per invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublisherConfig {
    /// Result directory relative to the workspace root. Empty means the
    /// workspace root itself.
    pub json_report_directory: String,

    /// Label prefix forwarded to the report generator for link building.
    pub plugin_url_path: String,

    #[serde(flatten)]
    pub policy: PolicyConfig,
}

impl PublisherConfig {
    /// Load configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validated result directory, relative to the workspace root.
    ///
    /// Absolute paths and paths climbing out of the workspace are rejected.
    /// An empty setting resolves to an empty path (the workspace root).
    pub fn source_subdir(&self) -> Result<PathBuf, ConfigError> {
        let dir = self.json_report_directory.trim();
        let rel = Path::new(dir);
        let mut depth = 0usize;
        for component in rel.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(ConfigError::InvalidSourceDir {
                            dir: dir.to_string(),
                            reason: "escapes the workspace",
                        });
                    }
                    depth -= 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ConfigError::InvalidSourceDir {
                        dir: dir.to_string(),
                        reason: "must be relative to the workspace",
                    });
                }
            }
        }
        Ok(rel.to_path_buf())
    }

    /// Resolve the configured result directory against `workspace`.
    pub fn source_dir(&self, workspace: &Path) -> Result<PathBuf, ConfigError> {
        let rel = self.source_subdir()?;
        if rel.as_os_str().is_empty() {
            return Ok(workspace.to_path_buf());
        }
        Ok(workspace.join(rel))
    }

    /// Policy flags in the shape the report generator expects.
    pub fn report_policy(&self) -> ReportPolicy {
        ReportPolicy::from(&self.policy)
    }
}
