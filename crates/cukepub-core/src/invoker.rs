//! Report generation boundary.
//!
//! The renderer itself is an external collaborator behind [`ReportGenerator`].
//! [`invoke`] is the only place its errors are observed: every failure is
//! turned into a [`GenerationFailure`] value so the publisher can still
//! resolve a verdict.

use std::path::PathBuf;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::context::PolicyConfig;
use crate::error::GenerationFailure;
use crate::obs;

/// Policy flags forwarded to the report generator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportPolicy {
    /// Skipped steps fail their scenario.
    pub skipped_fails: bool,

    /// Undefined steps fail their scenario.
    pub undefined_fails: bool,

    /// Render rich charts.
    pub charts_enabled: bool,
}

impl Default for ReportPolicy {
    fn default() -> Self {
        ReportPolicy::from(&PolicyConfig::default())
    }
}

impl From<&PolicyConfig> for ReportPolicy {
    fn from(policy: &PolicyConfig) -> Self {
        Self {
            skipped_fails: policy.skipped_fails,
            undefined_fails: policy.undefined_fails,
            charts_enabled: !policy.no_rich_charts,
        }
    }
}

/// Everything the report generator needs for one build.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportRequest {
    /// Absolute paths of every consolidated result document. Attachments are
    /// resolved by the generator relative to `output_dir`.
    pub document_paths: Vec<PathBuf>,

    /// Output root for the rendered report.
    pub output_dir: PathBuf,

    /// Link prefix used when rendering report URLs.
    pub label_prefix: String,

    pub build_id: String,
    pub project_name: String,
    pub policy: ReportPolicy,

    /// Generator runs under a build host (affects link layout).
    pub run_with_host: bool,

    /// Use the high-charts renderer instead of the default chart engine.
    pub high_charts: bool,

    /// Documents come from parallel test executions.
    pub parallel_testing: bool,
}

impl ReportRequest {
    /// Request with the fixed host flags used for every publish.
    pub fn new(
        document_paths: Vec<PathBuf>,
        output_dir: PathBuf,
        label_prefix: impl Into<String>,
        build_id: impl Into<String>,
        project_name: impl Into<String>,
        policy: ReportPolicy,
    ) -> Self {
        Self {
            document_paths,
            output_dir,
            label_prefix: label_prefix.into(),
            build_id: build_id.into(),
            project_name: project_name.into(),
            policy,
            run_with_host: true,
            high_charts: false,
            parallel_testing: false,
        }
    }
}

/// Successful report generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOutcome {
    /// Every scenario passed under the request's policy.
    pub all_passed: bool,
}

/// External report renderer.
///
/// Returns whether all scenarios passed. An `Err` means the report could not
/// be produced at all (malformed documents, renderer crash, timeout).
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &ReportRequest) -> anyhow::Result<bool>;
}

/// Run the generator and convert any error into a [`GenerationFailure`].
pub async fn invoke(
    generator: &dyn ReportGenerator,
    request: &ReportRequest,
) -> Result<ReportOutcome, GenerationFailure> {
    let start = Instant::now();
    info!(
        generator = generator.name(),
        documents = request.document_paths.len(),
        output_dir = %request.output_dir.display(),
        "Generating reports"
    );

    match generator.generate(request).await {
        Ok(all_passed) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            obs::emit_report_generated(&request.build_id, duration_ms, all_passed);
            Ok(ReportOutcome { all_passed })
        }
        Err(err) => {
            let failure = GenerationFailure::from_error(&err);
            error!(
                generator = generator.name(),
                error = ?err,
                "There was an error generating the reports"
            );
            obs::emit_report_failed(&request.build_id, &failure);
            Err(failure)
        }
    }
}
