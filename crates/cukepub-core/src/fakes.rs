//! In-memory fakes for the host and report generator (testing only)
//!
//! Provides `MemoryBuildHost` and `StubReportGenerator`, which satisfy the
//! trait contracts without touching the filesystem or spawning processes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::HostError;
use crate::host::{BuildHost, BuildRecord};
use crate::invoker::{ReportGenerator, ReportRequest};
use crate::status::Verdict;

// ---------------------------------------------------------------------------
// MemoryBuildHost
// ---------------------------------------------------------------------------

/// Build host that keeps every write, so tests can assert "exactly once".
#[derive(Debug, Default)]
pub struct MemoryBuildHost {
    verdicts: Mutex<Vec<Verdict>>,
    records: Mutex<Vec<BuildRecord>>,
}

impl MemoryBuildHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verdicts(&self) -> Vec<Verdict> {
        self.verdicts.lock().unwrap().clone()
    }

    pub fn records(&self) -> Vec<BuildRecord> {
        self.records.lock().unwrap().clone()
    }

    /// The single verdict written, if exactly one was.
    pub fn verdict(&self) -> Option<Verdict> {
        let verdicts = self.verdicts.lock().unwrap();
        match verdicts.as_slice() {
            [only] => Some(*only),
            _ => None,
        }
    }

    /// The single record attached, if exactly one was.
    pub fn record(&self) -> Option<BuildRecord> {
        let records = self.records.lock().unwrap();
        match records.as_slice() {
            [only] => Some(only.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl BuildHost for MemoryBuildHost {
    async fn set_verdict(&self, verdict: Verdict) -> Result<(), HostError> {
        self.verdicts.lock().unwrap().push(verdict);
        Ok(())
    }

    async fn attach_record(&self, record: BuildRecord) -> Result<(), HostError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StubReportGenerator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum StubMode {
    Outcome(bool),
    Error(String),
}

/// Report generator returning a canned answer and recording its inputs.
#[derive(Debug)]
pub struct StubReportGenerator {
    mode: StubMode,
    calls: AtomicUsize,
    last_request: Mutex<Option<ReportRequest>>,
}

impl StubReportGenerator {
    fn with_mode(mode: StubMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Every scenario passes.
    pub fn passing() -> Self {
        Self::with_mode(StubMode::Outcome(true))
    }

    /// At least one scenario fails.
    pub fn failing_scenarios() -> Self {
        Self::with_mode(StubMode::Outcome(false))
    }

    /// Generation itself fails with `message`.
    pub fn erroring(message: impl Into<String>) -> Self {
        Self::with_mode(StubMode::Error(message.into()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ReportRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportGenerator for StubReportGenerator {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, request: &ReportRequest) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        match &self.mode {
            StubMode::Outcome(all_passed) => Ok(*all_passed),
            StubMode::Error(message) => Err(anyhow::anyhow!("{message}")),
        }
    }
}
