//! Structured observability hooks for the publish lifecycle.
//!
//! This module provides:
//! - A build-scoped tracing span via `publish_span`
//! - Emission functions for key lifecycle events: start, collection, report
//!   generation, verdict
//!
//! Events are emitted at `info!` level unless noted (filter with `RUST_LOG`).

use std::path::PathBuf;

use tracing::{info, warn};

use crate::error::GenerationFailure;
use crate::locator::ArtifactKind;
use crate::status::Verdict;

/// Build-scoped span. Attach it to the publish future with
/// `tracing::Instrument` so every event carries the build id and project.
///
/// # Example
///
/// ```ignore
/// publish(ctx).instrument(publish_span("42", "checkout-service")).await;
/// ```
pub fn publish_span(build_id: &str, project: &str) -> tracing::Span {
    tracing::info_span!("cukepub.publish", build_id = %build_id, project = %project)
}

/// Emit event: publish started with the detected topology.
pub fn emit_publish_started(build_id: &str, topology: &str) {
    info!(event = "publish.started", build_id = %build_id, topology = %topology);
}

/// Emit event: the configured result directory was rejected (warning level).
pub fn emit_config_invalid(error: &dyn std::fmt::Display) {
    warn!(event = "config.invalid", error = %error, "Treating result discovery as empty");
}

/// Emit event: collection finished.
pub fn emit_collect_finished(topology: &str, copied: usize, unchanged: usize) {
    info!(
        event = "collect.finished",
        topology = %topology,
        copied = copied,
        unchanged = unchanged,
    );
}

/// Emit event: collection aborted (warning level; the verdict becomes FAILURE).
pub fn emit_collect_failed(error: &dyn std::fmt::Display) {
    warn!(event = "collect.failed", error = %error);
}

/// Emit event: files of one kind found in the report directory, one line per file.
pub fn emit_files_found(kind: ArtifactKind, files: &[PathBuf]) {
    info!(event = "scan.found", kind = kind.name(), count = files.len());
    for (index, file) in files.iter().enumerate() {
        info!(kind = kind.name(), index = index, file = %file.display(), "Found file");
    }
}

/// Emit event: report generated.
pub fn emit_report_generated(build_id: &str, duration_ms: u64, all_passed: bool) {
    info!(
        event = "report.generated",
        build_id = %build_id,
        duration_ms = duration_ms,
        all_passed = all_passed,
    );
}

/// Emit event: report generation failed (warning level).
pub fn emit_report_failed(build_id: &str, failure: &GenerationFailure) {
    warn!(event = "report.failed", build_id = %build_id, cause = %failure.cause);
}

/// Emit event: SUCCESS reached with no result documents (warning level).
pub fn emit_no_results(report_dir: &std::path::Path) {
    warn!(
        event = "verdict.no_results",
        report_dir = %report_dir.display(),
        "There were no json results found; the build passes with nothing evaluated"
    );
}

/// Emit event: verdict resolved and published.
pub fn emit_publish_finished(build_id: &str, verdict: Verdict, duration_ms: u64) {
    info!(
        event = "publish.finished",
        build_id = %build_id,
        verdict = %verdict,
        duration_ms = duration_ms,
    );
}
