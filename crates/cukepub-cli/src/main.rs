//! cukepub - Cucumber report publisher CLI
//!
//! Host adapter around `cukepub-core` for pipelines that call the publisher
//! as a process.
//!
//! ## Commands
//!
//! - `publish`: collect results, generate the report, write the verdict
//! - `check`: validate the configured result directory against a workspace

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn, Level};

use cukepub_core::{
    BuildContext, CommandReportGenerator, CucumberStatusGenerator, FsBuildHost,
    MountedRemoteWorkspace, PolicyConfig, PublishError, Publisher, PublisherConfig,
    ReportGenerator, RsyncRemoteWorkspace, Verdict,
};

#[derive(Parser)]
#[command(name = "cukepub")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Publish Cucumber results as a build report", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect results, generate the report and write the build verdict
    Publish(PublishArgs),

    /// Check that the result directory resolves inside the workspace
    Check {
        /// Workspace root
        #[arg(short, long, env = "CUKEPUB_WORKSPACE", default_value = ".")]
        workspace: PathBuf,

        /// Result directory relative to the workspace
        #[arg(long, env = "CUKEPUB_JSON_DIR", default_value = "")]
        json_dir: String,
    },
}

#[derive(Args)]
struct PublishArgs {
    /// Workspace root of the build
    #[arg(short, long, env = "CUKEPUB_WORKSPACE", default_value = ".")]
    workspace: PathBuf,

    /// Per-build artifacts root (reports go to <root>/cucumber-html-reports)
    #[arg(long, env = "CUKEPUB_ARTIFACTS_ROOT")]
    artifacts_root: PathBuf,

    /// Build number
    #[arg(long, env = "CUKEPUB_BUILD_NUMBER")]
    build_number: u64,

    /// Project (job) name
    #[arg(long, env = "CUKEPUB_PROJECT")]
    project: String,

    /// JSON configuration file; policy flags set here or on the command line both apply
    #[arg(long, env = "CUKEPUB_CONFIG")]
    config: Option<PathBuf>,

    /// Result directory relative to the workspace (empty = workspace root)
    #[arg(long, env = "CUKEPUB_JSON_DIR")]
    json_dir: Option<String>,

    /// Link prefix passed to the report generator
    #[arg(long, env = "CUKEPUB_URL_PATH")]
    url_path: Option<String>,

    /// Count skipped steps as failures
    #[arg(long, env = "CUKEPUB_SKIPPED_FAILS")]
    skipped_fails: bool,

    /// Count undefined steps as failures
    #[arg(long, env = "CUKEPUB_UNDEFINED_FAILS")]
    undefined_fails: bool,

    /// Disable rich charts in the rendered report
    #[arg(long, env = "CUKEPUB_NO_RICH_CHARTS")]
    no_rich_charts: bool,

    /// Mark failing scenarios UNSTABLE instead of FAILURE
    #[arg(long, env = "CUKEPUB_IGNORE_FAILED_TESTS")]
    ignore_failed_tests: bool,

    /// Remote workspace mounted at this path
    #[arg(long, conflicts_with = "remote_rsync")]
    remote_mount: Option<PathBuf>,

    /// Remote workspace pulled with rsync ([user@]host:/path)
    #[arg(long)]
    remote_rsync: Option<String>,

    /// Report command; receives the request as JSON on stdin
    #[arg(long, env = "CUKEPUB_REPORT_COMMAND")]
    report_command: Option<String>,

    /// Timeout for the report command and remote transfers (0 = none)
    #[arg(long, env = "CUKEPUB_REPORT_TIMEOUT_SECS", default_value_t = 600)]
    report_timeout_secs: u64,
}

impl PublishArgs {
    /// Merge the optional config file with command-line flags.
    ///
    /// An unreadable config file is logged and replaced by the defaults, so a
    /// publish still ends with a verdict.
    fn publisher_config(&self) -> PublisherConfig {
        let mut config = match &self.config {
            Some(path) => PublisherConfig::from_json_file(path).unwrap_or_else(|err| {
                warn!(error = %err, "Falling back to the default configuration");
                PublisherConfig::default()
            }),
            None => PublisherConfig::default(),
        };
        if let Some(dir) = &self.json_dir {
            config.json_report_directory = dir.clone();
        }
        if let Some(url) = &self.url_path {
            config.plugin_url_path = url.clone();
        }
        let flags = PolicyConfig {
            skipped_fails: self.skipped_fails,
            undefined_fails: self.undefined_fails,
            no_rich_charts: self.no_rich_charts,
            demote_failures_to_unstable: self.ignore_failed_tests,
        };
        config.policy = merge_policy(config.policy, flags);
        config
    }

    fn build_context(&self) -> BuildContext {
        let ctx = BuildContext::local(
            self.workspace.clone(),
            self.artifacts_root.clone(),
            self.build_number,
            self.project.clone(),
        );
        if let Some(mount) = &self.remote_mount {
            ctx.with_remote(Arc::new(MountedRemoteWorkspace::new(mount.clone())))
        } else if let Some(source) = &self.remote_rsync {
            let rsync = RsyncRemoteWorkspace::new(source.clone())
                .with_timeout(self.report_timeout_secs);
            ctx.with_remote(Arc::new(rsync))
        } else {
            ctx
        }
    }

    fn generator(&self) -> Arc<dyn ReportGenerator> {
        match &self.report_command {
            Some(line) => Arc::new(CommandReportGenerator::from_command_line(
                line,
                self.report_timeout_secs,
            )),
            None => Arc::new(CucumberStatusGenerator::new()),
        }
    }
}

/// A flag is on if either the config file or the command line turns it on.
fn merge_policy(file: PolicyConfig, flags: PolicyConfig) -> PolicyConfig {
    PolicyConfig {
        skipped_fails: file.skipped_fails || flags.skipped_fails,
        undefined_fails: file.undefined_fails || flags.undefined_fails,
        no_rich_charts: file.no_rich_charts || flags.no_rich_charts,
        demote_failures_to_unstable: file.demote_failures_to_unstable
            || flags.demote_failures_to_unstable,
    }
}

/// Verdict left on the host after a failed publish.
fn verdict_after_error(err: &PublishError) -> Verdict {
    err.written_verdict().unwrap_or(Verdict::NotBuilt)
}

/// Process exit code for a verdict.
fn exit_code(verdict: Verdict) -> u8 {
    match verdict {
        Verdict::Success => 0,
        Verdict::Failure => 1,
        Verdict::Unstable => 2,
        Verdict::NotBuilt => 3,
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    cukepub_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Publish(args) => cmd_publish(&args).await,
        Commands::Check {
            workspace,
            json_dir,
        } => cmd_check(&workspace, &json_dir),
    }
}

/// Run one publish invocation and map the verdict to the exit code.
async fn cmd_publish(args: &PublishArgs) -> Result<ExitCode> {
    let config = args.publisher_config();
    let ctx = args.build_context();
    let host = FsBuildHost::new(ctx.artifacts_root.clone(), ctx.build_id());
    let publisher = Publisher::new(config, args.generator());

    info!(
        project = %ctx.project_name,
        build = ctx.build_number,
        "Compiling Cucumber HTML reports"
    );

    let verdict = match publisher.run(&ctx, &host).await {
        Ok(result) => {
            println!("Verdict: {}", result.verdict);
            println!(
                "Documents: {}  Attachments: {}",
                result.artifacts.documents.len(),
                result.artifacts.attachments.len()
            );
            println!("Report directory: {}", ctx.report_dir().display());
            if result.no_results() {
                println!("Warning: no result documents were found");
            }
            result.verdict
        }
        Err(err) => {
            error!(error = %err, "Failed to record the build result");
            verdict_after_error(&err)
        }
    };

    Ok(ExitCode::from(exit_code(verdict)))
}

/// Validate a result directory setting.
fn cmd_check(workspace: &Path, json_dir: &str) -> Result<ExitCode> {
    let config = PublisherConfig {
        json_report_directory: json_dir.to_string(),
        ..Default::default()
    };
    let dir = config
        .source_dir(workspace)
        .context("result directory setting is invalid")?;

    if dir.is_dir() {
        let found = cukepub_core::scan(&dir);
        println!(
            "{}: {} document(s), {} attachment(s)",
            dir.display(),
            found.documents.len(),
            found.attachments.len()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}: no such directory", dir.display());
        Ok(ExitCode::FAILURE)
    }
}
