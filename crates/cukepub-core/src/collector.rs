//! Artifact collection into the consolidated report directory.
//!
//! Two strategies, chosen by [`Topology`]:
//! - local: locate files in the workspace and copy them one by one
//! - remote: one bulk transfer per pattern through a [`RemoteWorkspace`]
//!
//! Every local copy goes through [`copy_atomic`]: the bytes land in a
//! temporary file next to the destination and are renamed into place, so a
//! reader never observes a half-written document.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info};

use crate::context::{BuildContext, Topology, REPORT_DIR_NAME};
use crate::error::CollectError;
use crate::locator::{self, ArtifactKind};
use crate::obs;

/// Kinds collected on every pass, in order.
pub const COLLECTED_KINDS: [ArtifactKind; 2] = [ArtifactKind::Document, ArtifactKind::Attachment];

/// Files moved by one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Files written to the target.
    pub copied: usize,

    /// Files skipped because the target already held identical bytes.
    pub unchanged: usize,
}

impl TransferStats {
    fn absorb(&mut self, other: TransferStats) {
        self.copied += other.copied;
        self.unchanged += other.unchanged;
    }
}

/// Outcome of a full collection step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    pub documents: TransferStats,
    pub attachments: TransferStats,
}

impl CollectionSummary {
    pub fn total_copied(&self) -> usize {
        self.documents.copied + self.attachments.copied
    }

    fn stats_mut(&mut self, kind: ArtifactKind) -> &mut TransferStats {
        match kind {
            ArtifactKind::Document => &mut self.documents,
            ArtifactKind::Attachment => &mut self.attachments,
        }
    }
}

/// A build workspace living on another execution node.
///
/// Implementations pull every file under `subdir` matching `pattern` into
/// `target` in a single operation, preserving relative paths. A failure
/// aborts the whole transfer; callers do not retry.
#[async_trait]
pub trait RemoteWorkspace: Send + Sync {
    /// Human-readable location of the remote workspace.
    fn describe(&self) -> String;

    /// Copy matching files from the remote workspace into `target`.
    async fn copy_recursive_to(
        &self,
        subdir: &Path,
        pattern: &str,
        target: &Path,
    ) -> Result<TransferStats, CollectError>;
}

/// Collect documents and attachments for `ctx` into `target`.
///
/// `subdir` is the validated result directory relative to the workspace root.
/// Documents are collected before attachments; both complete before this
/// returns.
pub async fn collect(
    ctx: &BuildContext,
    subdir: &Path,
    target: &Path,
) -> Result<CollectionSummary, CollectError> {
    fs::create_dir_all(target).map_err(|source| CollectError::TargetDir {
        path: target.to_path_buf(),
        source,
    })?;

    let mut summary = CollectionSummary::default();
    match &ctx.topology {
        Topology::Local => {
            let source_root = ctx.workspace.join(subdir);
            let excluded = std::slice::from_ref(&ctx.artifacts_root);
            for kind in COLLECTED_KINDS {
                let stats = collect_local(&source_root, kind, excluded, target)?;
                summary.stats_mut(kind).absorb(stats);
            }
        }
        Topology::Remote(remote) => {
            for kind in COLLECTED_KINDS {
                info!(
                    remote = %remote.describe(),
                    target = %target.display(),
                    kind = kind.name(),
                    "Copying from remote workspace"
                );
                let stats = remote
                    .copy_recursive_to(subdir, kind.pattern(), target)
                    .await?;
                summary.stats_mut(kind).absorb(stats);
            }
        }
    }

    obs::emit_collect_finished(
        &ctx.topology.label(),
        summary.total_copied(),
        summary.documents.unchanged + summary.attachments.unchanged,
    );
    Ok(summary)
}

/// Locate files of `kind` under `source_root` and copy each into `target`.
///
/// Directories in `excluded` (the build's own artifacts root when it sits
/// inside the workspace) are not scanned.
fn collect_local(
    source_root: &Path,
    kind: ArtifactKind,
    excluded: &[PathBuf],
    target: &Path,
) -> Result<TransferStats, CollectError> {
    let files = locator::locate_sources(source_root, kind.pattern(), excluded);
    if files.is_empty() {
        info!(
            source = %source_root.display(),
            kind = kind.name(),
            "No result files found"
        );
        return Ok(TransferStats::default());
    }

    info!(
        source = %source_root.display(),
        target = %target.display(),
        kind = kind.name(),
        count = files.len(),
        "Copying result files to report directory"
    );
    copy_tree(source_root, &files, target)
}

/// Copy `files` (relative to `source_root`) into `target`, keeping layout.
pub fn copy_tree(
    source_root: &Path,
    files: &[PathBuf],
    target: &Path,
) -> Result<TransferStats, CollectError> {
    let mut stats = TransferStats::default();
    for rel in files {
        let src = source_root.join(rel);
        let dst = target.join(rel);
        let outcome = copy_atomic(&src, &dst).map_err(|source| CollectError::Io {
            source_path: src.clone(),
            target_path: dst.clone(),
            source,
        })?;
        match outcome {
            CopyOutcome::Copied => stats.copied += 1,
            CopyOutcome::Unchanged => {
                debug!(file = %rel.display(), "Target already up to date");
                stats.unchanged += 1;
            }
        }
    }
    Ok(stats)
}

/// Result of a single file copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied,
    Unchanged,
}

/// Copy `src` to `dst` through a temporary file and an atomic rename.
///
/// If `dst` already holds the same bytes it is left untouched.
pub fn copy_atomic(src: &Path, dst: &Path) -> io::Result<CopyOutcome> {
    let parent = dst
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "destination has no parent"))?;
    fs::create_dir_all(parent)?;

    if dst.is_file() && file_digest(dst)? == file_digest(src)? {
        return Ok(CopyOutcome::Unchanged);
    }

    let mut reader = File::open(src)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    io::copy(&mut reader, tmp.as_file_mut())?;
    // Temp files are created owner-only; keep the source's mode instead.
    tmp.as_file().set_permissions(reader.metadata()?.permissions())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dst).map_err(|e| e.error)?;
    Ok(CopyOutcome::Copied)
}

/// SHA-256 of a file's contents, hex encoded.
pub fn file_digest(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// MountedRemoteWorkspace
// ---------------------------------------------------------------------------

/// Remote workspace reachable through a filesystem mount.
///
/// The node's workspace is visible at `root` (NFS, SSHFS, a shared volume).
#[derive(Debug, Clone)]
pub struct MountedRemoteWorkspace {
    root: PathBuf,
}

impl MountedRemoteWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl RemoteWorkspace for MountedRemoteWorkspace {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    async fn copy_recursive_to(
        &self,
        subdir: &Path,
        pattern: &str,
        target: &Path,
    ) -> Result<TransferStats, CollectError> {
        let source_root = self.root.join(subdir);
        let pattern_owned = pattern.to_string();
        let target_owned = target.to_path_buf();

        let joined = tokio::task::spawn_blocking(move || {
            let files = locator::locate_sources(&source_root, &pattern_owned, &[]);
            copy_tree(&source_root, &files, &target_owned)
        })
        .await;

        match joined {
            Ok(Ok(stats)) => Ok(stats),
            Ok(Err(err)) => Err(CollectError::Transfer {
                remote: self.describe(),
                pattern: pattern.to_string(),
                message: err.to_string(),
            }),
            Err(join_err) => Err(CollectError::Transfer {
                remote: self.describe(),
                pattern: pattern.to_string(),
                message: format!("transfer task failed: {join_err}"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// RsyncRemoteWorkspace
// ---------------------------------------------------------------------------

/// Remote workspace pulled over `rsync` (typically via SSH).
#[derive(Debug, Clone)]
pub struct RsyncRemoteWorkspace {
    /// `[user@]host:/path/to/workspace`
    source: String,

    /// rsync executable.
    program: String,

    /// Per-transfer timeout in seconds (0 = none).
    timeout_secs: u64,
}

impl RsyncRemoteWorkspace {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            program: "rsync".to_string(),
            timeout_secs: 0,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Arguments for a single pattern transfer.
    pub fn transfer_args(&self, subdir: &Path, pattern: &str, target: &Path) -> Vec<String> {
        let mut remote = self.source.trim_end_matches('/').to_string();
        let sub = locator::slash_path(subdir);
        if !sub.is_empty() {
            remote.push('/');
            remote.push_str(&sub);
        }
        remote.push('/');

        let mut target_arg = target.display().to_string();
        if !target_arg.ends_with('/') {
            target_arg.push('/');
        }

        vec![
            "--archive".to_string(),
            "--prune-empty-dirs".to_string(),
            "--out-format=%n".to_string(),
            format!("--exclude={REPORT_DIR_NAME}/"),
            "--include=*/".to_string(),
            format!("--include={}", rsync_filter(pattern)),
            "--exclude=*".to_string(),
            remote,
            target_arg,
        ]
    }
}

/// Translate a `**/<name>` glob into an unanchored rsync filter.
fn rsync_filter(pattern: &str) -> &str {
    let mut rest = pattern;
    while let Some(stripped) = rest.strip_prefix("**/") {
        rest = stripped;
    }
    rest
}

#[async_trait]
impl RemoteWorkspace for RsyncRemoteWorkspace {
    fn describe(&self) -> String {
        self.source.clone()
    }

    async fn copy_recursive_to(
        &self,
        subdir: &Path,
        pattern: &str,
        target: &Path,
    ) -> Result<TransferStats, CollectError> {
        let transfer_err = |message: String| CollectError::Transfer {
            remote: self.source.clone(),
            pattern: pattern.to_string(),
            message,
        };

        let child = Command::new(&self.program)
            .args(self.transfer_args(subdir, pattern, target))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| transfer_err(format!("failed to spawn {}: {e}", self.program)))?;

        let waited = if self.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| transfer_err(format!("timed out after {} seconds", self.timeout_secs)))?
        } else {
            child.wait_with_output().await
        };
        let output = waited.map_err(|e| transfer_err(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(transfer_err(format!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        let copied = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.is_empty() && !line.ends_with('/'))
            .count();
        Ok(TransferStats {
            copied,
            unchanged: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn test_copy_atomic_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.json", b"[]");
        let dst = dir.path().join("out/deep/a.json");

        let outcome = copy_atomic(&dir.path().join("src/a.json"), &dst).unwrap();
        assert_eq!(outcome, CopyOutcome::Copied);
        assert_eq!(fs::read(&dst).unwrap(), b"[]");
    }

    #[test]
    fn test_copy_atomic_skips_identical_target() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.json", b"[1]");
        write(dir.path(), "out/a.json", b"[1]");

        let outcome =
            copy_atomic(&dir.path().join("src/a.json"), &dir.path().join("out/a.json")).unwrap();
        assert_eq!(outcome, CopyOutcome::Unchanged);
    }

    #[test]
    fn test_copy_atomic_overwrites_changed_target() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.json", b"[2]");
        write(dir.path(), "out/a.json", b"[1]");

        let dst = dir.path().join("out/a.json");
        let outcome = copy_atomic(&dir.path().join("src/a.json"), &dst).unwrap();
        assert_eq!(outcome, CopyOutcome::Copied);
        assert_eq!(fs::read(&dst).unwrap(), b"[2]");

        // No temp files left behind.
        let entries: Vec<_> = fs::read_dir(dir.path().join("out")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_atomic_keeps_source_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/shot.png", b"png");
        let src = dir.path().join("src/shot.png");
        fs::set_permissions(&src, fs::Permissions::from_mode(0o644)).unwrap();

        let dst = dir.path().join("out/shot.png");
        copy_atomic(&src, &dst).unwrap();
        let mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[test]
    fn test_copy_atomic_missing_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = copy_atomic(&dir.path().join("gone.json"), &dir.path().join("out/gone.json"));
        assert!(err.is_err());
    }

    #[test]
    fn test_copy_tree_reports_failing_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![PathBuf::from("vanished.json")];
        match copy_tree(dir.path(), &files, &dir.path().join("out")) {
            Err(CollectError::Io { source_path, .. }) => {
                assert!(source_path.ends_with("vanished.json"))
            }
            other => panic!("expected Io error, got {other:?}"),
        }
    }

    #[test]
    fn test_file_digest_matches_content() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a", b"hello");
        write(dir.path(), "b", b"hello");
        write(dir.path(), "c", b"world");
        let a = file_digest(&dir.path().join("a")).unwrap();
        assert_eq!(a, file_digest(&dir.path().join("b")).unwrap());
        assert_ne!(a, file_digest(&dir.path().join("c")).unwrap());
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_local_collect_preserves_layout() {
        let ws = tempfile::tempdir().unwrap();
        let builds = tempfile::tempdir().unwrap();
        write(ws.path(), "results/run1/a.json", b"[]");
        write(ws.path(), "results/shots/a.png", b"png");
        write(ws.path(), "results/readme.md", b"ignored");

        let ctx = BuildContext::local(ws.path(), builds.path(), 7, "proj");
        let target = ctx.report_dir();
        let summary = collect(&ctx, Path::new("results"), &target).await.unwrap();

        assert_eq!(summary.documents.copied, 1);
        assert_eq!(summary.attachments.copied, 1);
        assert!(target.join("run1/a.json").is_file());
        assert!(target.join("shots/a.png").is_file());
        assert!(!target.join("readme.md").exists());
    }

    #[tokio::test]
    async fn test_local_collect_skips_nested_artifacts_root() {
        let ws = tempfile::tempdir().unwrap();
        write(ws.path(), "results/a.json", b"[]");
        write(ws.path(), "builds/1/cucumber-html-reports/results/a.json", b"[]");

        let ctx = BuildContext::local(ws.path(), ws.path().join("builds/2"), 2, "proj");
        let target = ctx.report_dir();
        let summary = collect(&ctx, Path::new(""), &target).await.unwrap();
        assert_eq!(summary.documents.copied, 1);
        assert!(target.join("results/a.json").is_file());
        assert!(!target.join("builds").exists());

        // Collecting again must not pick up the consolidated copies.
        let again = collect(&ctx, Path::new(""), &target).await.unwrap();
        assert_eq!(again.documents.copied, 0);
        assert_eq!(again.documents.unchanged, 1);
    }

    #[tokio::test]
    async fn test_local_collect_empty_source_is_ok() {
        let ws = tempfile::tempdir().unwrap();
        let builds = tempfile::tempdir().unwrap();
        let ctx = BuildContext::local(ws.path(), builds.path(), 1, "proj");
        let target = ctx.report_dir();

        let summary = collect(&ctx, Path::new("does-not-exist"), &target).await.unwrap();
        assert_eq!(summary, CollectionSummary::default());
        assert!(target.is_dir());
    }

    #[tokio::test]
    async fn test_mounted_remote_copies_per_pattern() {
        let node = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        write(node.path(), "out/a.json", b"[]");
        write(node.path(), "out/b/c.png", b"png");

        let remote = MountedRemoteWorkspace::new(node.path());
        let docs = remote
            .copy_recursive_to(Path::new("out"), "**/*.json", target.path())
            .await
            .unwrap();
        assert_eq!(docs.copied, 1);
        assert!(target.path().join("a.json").is_file());
        assert!(!target.path().join("b/c.png").exists());
    }

    #[test]
    fn test_rsync_filter_strips_recursive_prefix() {
        assert_eq!(rsync_filter("**/*.json"), "*.json");
        assert_eq!(rsync_filter("*.png"), "*.png");
    }

    #[test]
    fn test_rsync_transfer_args() {
        let remote = RsyncRemoteWorkspace::new("ci@node-3:/var/ws/");
        let args = remote.transfer_args(Path::new("target/cucumber"), "**/*.json", Path::new("/b/r"));
        assert!(args.contains(&"--include=*.json".to_string()));
        assert!(args.contains(&"--exclude=*".to_string()));
        let report_filter = args
            .iter()
            .position(|a| a == "--exclude=cucumber-html-reports/")
            .unwrap();
        let dir_filter = args.iter().position(|a| a == "--include=*/").unwrap();
        assert!(report_filter < dir_filter);
        assert_eq!(args[args.len() - 2], "ci@node-3:/var/ws/target/cucumber/");
        assert_eq!(args[args.len() - 1], "/b/r/");

        let root_args = remote.transfer_args(Path::new(""), "**/*.png", Path::new("/b/r/"));
        assert_eq!(root_args[root_args.len() - 2], "ci@node-3:/var/ws/");
        assert_eq!(root_args[root_args.len() - 1], "/b/r/");
    }

    #[tokio::test]
    async fn test_rsync_spawn_failure_is_transfer_error() {
        let target = tempfile::tempdir().unwrap();
        let remote = RsyncRemoteWorkspace::new("node:/ws")
            .with_program("cukepub-no-such-rsync-binary")
            .with_timeout(5);
        let err = remote
            .copy_recursive_to(Path::new(""), "**/*.json", target.path())
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Transfer { .. }));
    }
}
