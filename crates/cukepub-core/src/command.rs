//! External report renderer driven as a child process.

use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::invoker::{ReportGenerator, ReportRequest};

/// Exit code meaning "report generated, every scenario passed".
pub const EXIT_ALL_PASSED: i32 = 0;

/// Exit code meaning "report generated, some scenarios failed".
pub const EXIT_SCENARIOS_FAILED: i32 = 1;

/// Runs a report command and reads the outcome from its exit code.
///
/// The [`ReportRequest`] is written to the command's stdin as JSON. Exit code
/// 0 means all scenarios passed, 1 means some failed; any other exit code, a
/// spawn error or a timeout is a generation failure.
#[derive(Debug, Clone)]
pub struct CommandReportGenerator {
    /// Command to execute (first element is executable).
    command: Vec<String>,

    /// Timeout in seconds (0 = none).
    timeout_secs: u64,
}

impl CommandReportGenerator {
    pub fn new(command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command,
            timeout_secs,
        }
    }

    /// Split a shell-style command line on whitespace.
    pub fn from_command_line(line: &str, timeout_secs: u64) -> Self {
        Self::new(line.split_whitespace().map(str::to_string).collect(), timeout_secs)
    }
}

#[async_trait]
impl ReportGenerator for CommandReportGenerator {
    fn name(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("command")
    }

    async fn generate(&self, request: &ReportRequest) -> anyhow::Result<bool> {
        let start = Instant::now();

        if self.command.is_empty() {
            bail!("report command is empty");
        }
        let exe = &self.command[0];
        let args = &self.command[1..];

        let payload = serde_json::to_vec(request).context("failed to encode report request")?;

        let mut child = Command::new(exe)
            .args(args)
            .current_dir(&request.output_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn report command {exe}"))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A renderer that ignores stdin may exit before reading it.
            if let Err(err) = stdin.write_all(&payload).await {
                debug!(error = %err, "report command closed stdin early");
            }
        }

        let output = if self.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(self.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "report command {} timed out after {} seconds",
                    exe,
                    self.timeout_secs
                )
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!(
            command = %exe,
            duration_ms = duration_ms,
            stdout = %String::from_utf8_lossy(&output.stdout),
            "report command finished"
        );

        match output.status.code() {
            Some(EXIT_ALL_PASSED) => Ok(true),
            Some(EXIT_SCENARIOS_FAILED) => Ok(false),
            Some(code) => bail!("report command {exe} exited with code {code}: {}", stderr.trim()),
            None => bail!("report command {exe} was terminated by a signal"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::ReportPolicy;
    use std::path::PathBuf;

    fn request(dir: &std::path::Path) -> ReportRequest {
        ReportRequest::new(
            vec![dir.join("a.json")],
            dir.to_path_buf(),
            "",
            "5",
            "proj",
            ReportPolicy::default(),
        )
    }

    fn sh(script: &str) -> CommandReportGenerator {
        CommandReportGenerator::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            30,
        )
    }

    #[tokio::test]
    async fn test_exit_zero_is_all_passed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(sh("cat >/dev/null; exit 0").generate(&request(dir.path())).await.unwrap());
    }

    #[tokio::test]
    async fn test_exit_one_is_scenarios_failed() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!sh("cat >/dev/null; exit 1").generate(&request(dir.path())).await.unwrap());
    }

    #[tokio::test]
    async fn test_other_exit_code_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = sh("echo broken >&2; exit 3")
            .generate(&request(dir.path()))
            .await
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("code 3"));
        assert!(msg.contains("broken"));
    }

    #[tokio::test]
    async fn test_request_is_written_to_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let generator = sh("cat > request.out");
        assert!(generator.generate(&request(dir.path())).await.unwrap());

        let raw = std::fs::read(dir.path().join("request.out")).unwrap();
        let seen: ReportRequest = serde_json::from_slice(&raw).unwrap();
        assert_eq!(seen.build_id, "5");
        assert_eq!(seen.document_paths, vec![dir.path().join("a.json")]);
    }

    #[tokio::test]
    async fn test_timeout_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let generator = CommandReportGenerator::new(
            vec!["sh".to_string(), "-c".to_string(), "sleep 5".to_string()],
            1,
        );
        let err = generator.generate(&request(dir.path())).await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_empty_command_is_error() {
        let generator = CommandReportGenerator::new(vec![], 0);
        let err = generator
            .generate(&request(&PathBuf::from(".")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn test_from_command_line() {
        let generator = CommandReportGenerator::from_command_line("render-report --html  out", 0);
        assert_eq!(generator.command, vec!["render-report", "--html", "out"]);
        assert_eq!(generator.name(), "render-report");
    }
}
