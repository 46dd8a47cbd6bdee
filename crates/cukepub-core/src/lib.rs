//! cukepub core - Cucumber result aggregation and build verdicts
//!
//! Provides a publisher that:
//! - Collects result documents and attachments from local or remote workspaces
//! - Consolidates them into `<build>/cucumber-html-reports/`
//! - Drives an external report generator
//! - Resolves and records the final build verdict

pub mod collector;
pub mod command;
pub mod context;
pub mod cucumber;
pub mod error;
pub mod fakes;
pub mod host;
pub mod invoker;
pub mod locator;
pub mod obs;
pub mod publisher;
pub mod status;
pub mod telemetry;

// Re-export key types
pub use collector::{
    collect, CollectionSummary, MountedRemoteWorkspace, RemoteWorkspace, RsyncRemoteWorkspace,
    TransferStats,
};
pub use command::CommandReportGenerator;
pub use context::{BuildContext, PolicyConfig, PublisherConfig, Topology, REPORT_DIR_NAME};
pub use cucumber::CucumberStatusGenerator;
pub use error::{CollectError, ConfigError, GenerationFailure, HostError, PublishError};
pub use host::{BuildHost, BuildRecord, FsBuildHost, RecordedFile};
pub use invoker::{invoke, ReportGenerator, ReportOutcome, ReportPolicy, ReportRequest};
pub use locator::{locate, scan, ArtifactKind, ResultArtifactSet};
pub use publisher::{PublishResult, Publisher};
pub use status::{Resolution, StatusResolver, Verdict};
pub use telemetry::init_tracing;
