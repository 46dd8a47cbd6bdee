//! Publish orchestration: collect, scan, generate, resolve, record.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::collector::{self, file_digest, CollectionSummary};
use crate::context::{BuildContext, PublisherConfig};
use crate::error::PublishError;
use crate::host::{BuildHost, BuildRecord, RecordedFile};
use crate::invoker::{self, ReportGenerator, ReportRequest};
use crate::locator::{self, ArtifactKind, ResultArtifactSet};
use crate::obs;
use crate::status::{StatusResolver, Verdict};

/// Result of one publish invocation.
#[derive(Debug, Clone)]
pub struct PublishResult {
    /// Verdict written to the host.
    pub verdict: Verdict,

    /// Collection counts, `None` if collection was skipped or failed.
    pub collection: Option<CollectionSummary>,

    /// Consolidated files found in the report directory after collection.
    pub artifacts: ResultArtifactSet,

    /// Record attached to the host.
    pub record: BuildRecord,
}

impl PublishResult {
    pub fn no_results(&self) -> bool {
        self.record.no_results
    }
}

/// Publish orchestrator.
///
/// Holds the invocation-independent inputs: configuration and the report
/// generator. One [`Publisher::run`] call handles one build.
pub struct Publisher {
    config: PublisherConfig,
    generator: Arc<dyn ReportGenerator>,
}

impl Publisher {
    pub fn new(config: PublisherConfig, generator: Arc<dyn ReportGenerator>) -> Self {
        Self { config, generator }
    }

    /// Publish the results of one build.
    ///
    /// Steps, strictly in order:
    /// 1. collect documents and attachments into the report directory
    /// 2. re-scan the report directory (the consolidated set is authoritative)
    /// 3. generate the report if any documents were found
    /// 4. resolve the verdict
    /// 5. write the verdict and attach the build record, once each
    ///
    /// Collection and generation failures become a FAILURE verdict; only host
    /// write errors are returned, naming which write failed.
    pub async fn run(
        &self,
        ctx: &BuildContext,
        host: &dyn BuildHost,
    ) -> Result<PublishResult, PublishError> {
        let span = obs::publish_span(&ctx.build_id(), &ctx.project_name);
        self.run_inner(ctx, host).instrument(span).await
    }

    async fn run_inner(
        &self,
        ctx: &BuildContext,
        host: &dyn BuildHost,
    ) -> Result<PublishResult, PublishError> {
        let start = Instant::now();
        let started_at = Utc::now();
        let build_id = ctx.build_id();
        let topology = ctx.topology.label();
        let target = ctx.report_dir();

        obs::emit_publish_started(&build_id, &topology);
        if ctx.topology.is_remote() {
            info!("Detected this build is running on a remote node");
        } else {
            info!(workspace = %ctx.workspace.display(), "Detected this build is running locally");
        }

        // 1. Collect
        let mut failure = None;
        let collection = match self.config.source_subdir() {
            Ok(subdir) => match collector::collect(ctx, &subdir, &target).await {
                Ok(summary) => Some(summary),
                Err(err) => {
                    obs::emit_collect_failed(&err);
                    failure = Some(err.to_string());
                    None
                }
            },
            Err(err) => {
                obs::emit_config_invalid(&err);
                None
            }
        };

        // 2. Re-scan the consolidated directory
        let artifacts = locator::scan(&target);
        obs::emit_files_found(ArtifactKind::Document, &artifacts.documents);
        obs::emit_files_found(ArtifactKind::Attachment, &artifacts.attachments);

        // 3 + 4. Generate and resolve
        let (verdict, no_results) = if failure.is_some() {
            (Verdict::Failure, false)
        } else {
            let outcome = if artifacts.documents.is_empty() {
                None
            } else {
                let request = ReportRequest::new(
                    artifacts.document_paths_under(&target),
                    target.clone(),
                    self.config.plugin_url_path.clone(),
                    build_id.clone(),
                    ctx.project_name.clone(),
                    self.config.report_policy(),
                );
                Some(invoker::invoke(self.generator.as_ref(), &request).await)
            };

            if let Some(Err(gen_failure)) = &outcome {
                failure = Some(gen_failure.to_string());
            }

            let resolution = StatusResolver::resolve(
                artifacts.documents.len(),
                outcome.as_ref(),
                self.config.policy.demote_failures_to_unstable,
            );
            if resolution.no_results {
                obs::emit_no_results(&target);
            }
            (resolution.verdict, resolution.no_results)
        };

        // 5. Record
        let duration_ms = start.elapsed().as_millis() as u64;
        let record = BuildRecord {
            record_id: Uuid::new_v4(),
            build_id: build_id.clone(),
            project_name: ctx.project_name.clone(),
            topology,
            report_dir: target.clone(),
            label_prefix: self.config.plugin_url_path.clone(),
            verdict,
            no_results,
            failure,
            files: recorded_files(&target, &artifacts),
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        };

        host.set_verdict(verdict).await.map_err(PublishError::Verdict)?;
        host.attach_record(record.clone())
            .await
            .map_err(|source| PublishError::Record { verdict, source })?;
        obs::emit_publish_finished(&build_id, verdict, duration_ms);

        Ok(PublishResult {
            verdict,
            collection,
            artifacts,
            record,
        })
    }
}

/// Inventory of the consolidated files with their content digests.
fn recorded_files(target: &Path, artifacts: &ResultArtifactSet) -> Vec<RecordedFile> {
    [ArtifactKind::Document, ArtifactKind::Attachment]
        .into_iter()
        .flat_map(|kind| {
            artifacts.of_kind(kind).iter().map(move |rel| RecordedFile {
                path: rel.clone(),
                kind,
                sha256: file_digest(&target.join(rel)).ok(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{MemoryBuildHost, StubReportGenerator};
    use crate::context::PolicyConfig;
    use crate::error::HostError;
    use async_trait::async_trait;
    use std::fs;

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn publisher(generator: Arc<StubReportGenerator>, policy: PolicyConfig) -> Publisher {
        Publisher::new(
            PublisherConfig {
                json_report_directory: "results".to_string(),
                plugin_url_path: "/ci/".to_string(),
                policy,
            },
            generator,
        )
    }

    #[tokio::test]
    async fn test_request_uses_consolidated_absolute_paths() {
        let ws = tempfile::tempdir().unwrap();
        let builds = tempfile::tempdir().unwrap();
        write(ws.path(), "results/a.json", b"[]");
        write(ws.path(), "results/img/a.png", b"png");

        let generator = Arc::new(StubReportGenerator::passing());
        let ctx = BuildContext::local(ws.path(), builds.path(), 3, "proj");
        let host = MemoryBuildHost::new();
        publisher(generator.clone(), PolicyConfig::default())
            .run(&ctx, &host)
            .await
            .unwrap();

        let request = generator.last_request().unwrap();
        assert_eq!(request.document_paths, vec![ctx.report_dir().join("a.json")]);
        assert_eq!(request.output_dir, ctx.report_dir());
        assert_eq!(request.label_prefix, "/ci/");
        assert_eq!(request.build_id, "3");
    }

    #[tokio::test]
    async fn test_policy_flags_reach_generator() {
        let ws = tempfile::tempdir().unwrap();
        let builds = tempfile::tempdir().unwrap();
        write(ws.path(), "results/a.json", b"[]");

        let generator = Arc::new(StubReportGenerator::passing());
        let policy = PolicyConfig {
            skipped_fails: true,
            undefined_fails: false,
            no_rich_charts: true,
            demote_failures_to_unstable: false,
        };
        let ctx = BuildContext::local(ws.path(), builds.path(), 3, "proj");
        publisher(generator.clone(), policy)
            .run(&ctx, &MemoryBuildHost::new())
            .await
            .unwrap();

        let seen = generator.last_request().unwrap().policy;
        assert!(seen.skipped_fails);
        assert!(!seen.undefined_fails);
        assert!(!seen.charts_enabled);
    }

    #[tokio::test]
    async fn test_invalid_source_dir_is_treated_as_empty() {
        let ws = tempfile::tempdir().unwrap();
        let builds = tempfile::tempdir().unwrap();
        write(ws.path(), "a.json", b"[]");

        let generator = Arc::new(StubReportGenerator::failing_scenarios());
        let publisher = Publisher::new(
            PublisherConfig {
                json_report_directory: "../outside".to_string(),
                ..Default::default()
            },
            generator.clone(),
        );
        let ctx = BuildContext::local(ws.path(), builds.path(), 1, "proj");
        let host = MemoryBuildHost::new();
        let result = publisher.run(&ctx, &host).await.unwrap();

        assert_eq!(result.verdict, Verdict::Success);
        assert!(result.no_results());
        assert!(result.collection.is_none());
        assert_eq!(generator.calls(), 0);
        assert_eq!(host.verdict(), Some(Verdict::Success));
    }

    #[tokio::test]
    async fn test_record_lists_files_with_digests() {
        let ws = tempfile::tempdir().unwrap();
        let builds = tempfile::tempdir().unwrap();
        write(ws.path(), "results/a.json", b"[]");
        write(ws.path(), "results/a.png", b"png");

        let ctx = BuildContext::local(ws.path(), builds.path(), 8, "proj");
        let host = MemoryBuildHost::new();
        publisher(Arc::new(StubReportGenerator::passing()), PolicyConfig::default())
            .run(&ctx, &host)
            .await
            .unwrap();

        let record = host.record().unwrap();
        assert_eq!(record.document_count(), 1);
        assert_eq!(record.attachment_count(), 1);
        assert!(record.files.iter().all(|f| f.sha256.is_some()));
        assert_eq!(record.label_prefix, "/ci/");
        assert_eq!(record.topology, "local");
        assert!(record.failure.is_none());
    }

    /// Accepts the verdict, refuses the record.
    struct RecordRejectingHost {
        inner: MemoryBuildHost,
    }

    #[async_trait]
    impl BuildHost for RecordRejectingHost {
        async fn set_verdict(&self, verdict: Verdict) -> Result<(), HostError> {
            self.inner.set_verdict(verdict).await
        }

        async fn attach_record(&self, _record: BuildRecord) -> Result<(), HostError> {
            Err(HostError::RecordAlreadyAttached {
                build_id: "5".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_record_failure_keeps_written_verdict() {
        let ws = tempfile::tempdir().unwrap();
        let builds = tempfile::tempdir().unwrap();
        write(ws.path(), "results/a.json", b"[]");

        let ctx = BuildContext::local(ws.path(), builds.path(), 5, "proj");
        let host = RecordRejectingHost {
            inner: MemoryBuildHost::new(),
        };
        let err = publisher(
            Arc::new(StubReportGenerator::failing_scenarios()),
            PolicyConfig::default(),
        )
        .run(&ctx, &host)
        .await
        .unwrap_err();

        assert!(matches!(err, PublishError::Record { .. }));
        assert_eq!(err.written_verdict(), Some(Verdict::Failure));
        assert_eq!(host.inner.verdict(), Some(Verdict::Failure));
    }
}
