//! Result file discovery.
//!
//! Walks a root directory and returns the relative paths of files matching a
//! glob pattern. A missing or unreadable root yields an empty set, never an
//! error: discovering nothing is a valid outcome that the status resolver
//! handles.

use std::fs;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::context::REPORT_DIR_NAME;

/// Pattern for structured result documents.
pub const DOCUMENT_PATTERN: &str = "**/*.json";

/// Pattern for attachments referenced by result documents.
pub const ATTACHMENT_PATTERN: &str = "**/*.png";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// The two kinds of files collected for a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Machine-readable scenario outcome records.
    Document,

    /// Binary files (screenshots) referenced by documents.
    Attachment,
}

impl ArtifactKind {
    /// Glob pattern selecting this kind of file.
    pub fn pattern(&self) -> &'static str {
        match self {
            ArtifactKind::Document => DOCUMENT_PATTERN,
            ArtifactKind::Attachment => ATTACHMENT_PATTERN,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Document => "document",
            ArtifactKind::Attachment => "attachment",
        }
    }
}

/// Relative paths discovered under one root, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultArtifactSet {
    pub documents: Vec<PathBuf>,
    pub attachments: Vec<PathBuf>,
}

impl ResultArtifactSet {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.attachments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len() + self.attachments.len()
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> &[PathBuf] {
        match kind {
            ArtifactKind::Document => &self.documents,
            ArtifactKind::Attachment => &self.attachments,
        }
    }

    /// Absolute paths of every document, resolved against `root`.
    pub fn document_paths_under(&self, root: &Path) -> Vec<PathBuf> {
        self.documents.iter().map(|rel| root.join(rel)).collect()
    }
}

/// Scan `root` for both documents and attachments.
///
/// The two lookups are independent; a failure to find one kind has no effect
/// on the other.
pub fn scan(root: &Path) -> ResultArtifactSet {
    ResultArtifactSet {
        documents: locate(root, ArtifactKind::Document.pattern()),
        attachments: locate(root, ArtifactKind::Attachment.pattern()),
    }
}

/// Return the relative paths of regular files under `root` matching `pattern`.
///
/// Entries are visited in file-name order, so the result is deterministic for
/// a given tree. Symbolic links are followed; a link cycle is reported and
/// skipped. An invalid pattern, a missing root, or a root that is not a
/// directory all produce an empty result.
pub fn locate(root: &Path, pattern: &str) -> Vec<PathBuf> {
    walk(root, pattern, |_| false)
}

/// Locate result files in a build workspace.
///
/// Same as [`locate`], but never descends into a nested
/// `cucumber-html-reports` directory or into any directory in `excluded`.
/// Consolidated output from earlier builds living inside the workspace is
/// therefore not collected again as fresh results.
pub fn locate_sources(root: &Path, pattern: &str, excluded: &[PathBuf]) -> Vec<PathBuf> {
    let excluded: Vec<PathBuf> = excluded
        .iter()
        .flat_map(|path| {
            let canonical = fs::canonicalize(path).ok();
            std::iter::once(path.clone()).chain(canonical)
        })
        .collect();

    walk(root, pattern, |dir| {
        if dir.file_name() == REPORT_DIR_NAME {
            return true;
        }
        if excluded.is_empty() {
            return false;
        }
        let path = dir.path();
        excluded.iter().any(|ex| ex.as_path() == path)
            || fs::canonicalize(path).is_ok_and(|real| excluded.contains(&real))
    })
}

fn walk(root: &Path, pattern: &str, skip_dir: impl Fn(&DirEntry) -> bool) -> Vec<PathBuf> {
    let pattern = match Pattern::new(pattern) {
        Ok(p) => p,
        Err(err) => {
            warn!(pattern = %pattern, error = %err, "invalid result file pattern");
            return Vec::new();
        }
    };

    if !root.is_dir() {
        debug!(root = %root.display(), "scan root missing or not a directory");
        return Vec::new();
    }

    let walker = WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            let skipped = e.depth() > 0 && e.file_type().is_dir() && skip_dir(e);
            if skipped {
                debug!(dir = %e.path().display(), "skipping report output directory");
            }
            !skipped
        });

    let mut found = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if pattern.matches_with(&slash_path(rel), MATCH_OPTIONS) {
            found.push(rel.to_path_buf());
        }
    }
    found
}

/// Render a relative path with `/` separators for pattern matching.
pub(crate) fn slash_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
