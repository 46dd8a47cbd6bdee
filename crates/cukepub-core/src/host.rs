//! Host build integration: the verdict sink and the attached build record.
//!
//! The host pipeline owns the build; this crate only hands it a verdict and an
//! opaque record once per invocation. [`FsBuildHost`] persists both next to the
//! report directory, and `fakes::MemoryBuildHost` keeps them in memory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::error::HostError;
use crate::locator::ArtifactKind;
use crate::status::Verdict;

/// File name of the persisted verdict.
pub const VERDICT_FILE: &str = "verdict.txt";

/// File name of the persisted build record. It must not end in `.json`: an
/// artifacts root inside a workspace is otherwise scanned as results.
pub const RECORD_FILE: &str = "cukepub-record.json.txt";

/// One consolidated file as seen after collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordedFile {
    /// Path relative to the report directory.
    pub path: PathBuf,
    pub kind: ArtifactKind,

    /// SHA-256 of the file contents, `None` if it could not be read.
    pub sha256: Option<String>,
}

/// Record attached to the host build after publishing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildRecord {
    pub record_id: Uuid,
    pub build_id: String,
    pub project_name: String,
    pub topology: String,
    pub report_dir: PathBuf,
    pub label_prefix: String,
    pub verdict: Verdict,

    /// The verdict is SUCCESS only because no result documents were found.
    pub no_results: bool,

    /// Collection or generation error, if any.
    pub failure: Option<String>,

    pub files: Vec<RecordedFile>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl BuildRecord {
    pub fn document_count(&self) -> usize {
        self.files_of(ArtifactKind::Document).count()
    }

    pub fn attachment_count(&self) -> usize {
        self.files_of(ArtifactKind::Attachment).count()
    }

    pub fn files_of(&self, kind: ArtifactKind) -> impl Iterator<Item = &RecordedFile> {
        self.files.iter().filter(move |f| f.kind == kind)
    }
}

/// Host pipeline build sink.
///
/// Both calls happen exactly once per invocation; implementations may reject
/// a second call.
#[async_trait]
pub trait BuildHost: Send + Sync {
    /// Set the terminal build verdict.
    async fn set_verdict(&self, verdict: Verdict) -> Result<(), HostError>;

    /// Attach the build record.
    async fn attach_record(&self, record: BuildRecord) -> Result<(), HostError>;
}

#[derive(Debug, Default)]
struct WriteState {
    verdict_written: bool,
    record_written: bool,
}

/// Build host persisting to the build artifacts root.
///
/// Layout:
/// - `<root>/verdict.txt`: the verdict string
/// - `<root>/cukepub-record.json.txt`: the build record
///
/// Both files sit outside the report directory so they are never scanned as
/// result documents.
#[derive(Debug)]
pub struct FsBuildHost {
    root: PathBuf,
    build_id: String,
    state: Mutex<WriteState>,
}

impl FsBuildHost {
    pub fn new(root: impl Into<PathBuf>, build_id: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            build_id: build_id.into(),
            state: Mutex::new(WriteState::default()),
        }
    }

    pub fn verdict_path(&self) -> PathBuf {
        self.root.join(VERDICT_FILE)
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(RECORD_FILE)
    }

    /// Read back a persisted record.
    pub fn load_record(path: &Path) -> Result<BuildRecord, HostError> {
        let raw = std::fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), HostError> {
        std::fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(data)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

#[async_trait]
impl BuildHost for FsBuildHost {
    async fn set_verdict(&self, verdict: Verdict) -> Result<(), HostError> {
        {
            let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if state.verdict_written {
                return Err(HostError::VerdictAlreadySet {
                    build_id: self.build_id.clone(),
                });
            }
        }
        let mut line = verdict.as_str().to_string();
        line.push('\n');
        self.write_atomic(&self.verdict_path(), line.as_bytes())?;
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .verdict_written = true;
        Ok(())
    }

    async fn attach_record(&self, record: BuildRecord) -> Result<(), HostError> {
        {
            let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
            if state.record_written {
                return Err(HostError::RecordAlreadyAttached {
                    build_id: self.build_id.clone(),
                });
            }
        }
        let data = serde_json::to_vec_pretty(&record)?;
        self.write_atomic(&self.record_path(), &data)?;
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .record_written = true;
        Ok(())
    }
}
