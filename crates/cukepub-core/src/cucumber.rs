//! Status-only report generator for Cucumber JSON documents.
//!
//! Reads every result document, tallies scenario and step outcomes, and
//! decides whether the build passed under the request's policy. It renders no
//! HTML; hosts that want a rendered report plug in a
//! [`crate::command::CommandReportGenerator`] instead.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::invoker::{ReportGenerator, ReportPolicy, ReportRequest};

/// One feature in a Cucumber JSON document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Feature {
    pub name: String,
    pub uri: String,
    pub elements: Vec<Element>,
}

/// A scenario or background.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Element {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub steps: Vec<Step>,
    pub before: Vec<Hook>,
    pub after: Vec<Hook>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Step {
    pub name: String,
    pub keyword: String,
    pub result: Option<StepResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Hook {
    pub result: Option<StepResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StepResult {
    pub status: String,
    pub error_message: Option<String>,
}

/// Normalised step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepStatus {
    Passed,
    Failed,
    Skipped,
    Pending,
    Undefined,
    Missing,
}

impl StepStatus {
    /// Parse a Cucumber status string. Unknown values count as failures.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "passed" => StepStatus::Passed,
            "skipped" => StepStatus::Skipped,
            "pending" => StepStatus::Pending,
            "undefined" => StepStatus::Undefined,
            "missing" => StepStatus::Missing,
            _ => StepStatus::Failed,
        }
    }

    /// Whether this status fails its scenario under `policy`.
    pub fn fails(&self, policy: &ReportPolicy) -> bool {
        match self {
            StepStatus::Passed => false,
            StepStatus::Failed => true,
            StepStatus::Skipped | StepStatus::Pending => policy.skipped_fails,
            StepStatus::Undefined | StepStatus::Missing => policy.undefined_fails,
        }
    }
}

/// Outcome counts across all documents of one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    pub features: usize,
    pub scenarios: usize,
    pub failed_scenarios: usize,
    pub steps: BTreeMap<StepStatus, usize>,
}

impl Tally {
    pub fn all_passed(&self) -> bool {
        self.failed_scenarios == 0
    }

    pub fn steps_with(&self, status: StepStatus) -> usize {
        self.steps.get(&status).copied().unwrap_or(0)
    }

    /// Add one document's features.
    pub fn absorb(&mut self, features: &[Feature], policy: &ReportPolicy) {
        for feature in features {
            self.features += 1;
            for element in &feature.elements {
                let is_background = element.kind.eq_ignore_ascii_case("background");
                let mut failed = false;

                let hook_results = element.before.iter().chain(&element.after).map(|h| &h.result);
                let step_results = element.steps.iter().map(|s| &s.result);
                for result in hook_results.chain(step_results) {
                    // A step without a result never ran.
                    let status = result
                        .as_ref()
                        .map(|r| StepStatus::parse(&r.status))
                        .unwrap_or(StepStatus::Missing);
                    *self.steps.entry(status).or_insert(0) += 1;
                    failed |= status.fails(policy);
                }

                if !is_background {
                    self.scenarios += 1;
                }
                if failed {
                    self.failed_scenarios += 1;
                }
            }
        }
    }
}

/// Parse one Cucumber JSON document. An empty file holds no features.
pub fn parse_document(path: &Path) -> anyhow::Result<Vec<Feature>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read result document {}", path.display()))?;
    if raw.trim().is_empty() {
        warn!(file = %path.display(), "Empty result document");
        return Ok(Vec::new());
    }
    serde_json::from_str(&raw)
        .with_context(|| format!("malformed cucumber json in {}", path.display()))
}

/// Report generator that only evaluates pass/fail.
#[derive(Debug, Clone, Default)]
pub struct CucumberStatusGenerator;

impl CucumberStatusGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Tally every document of `request`.
    pub fn tally(request: &ReportRequest) -> anyhow::Result<Tally> {
        let mut tally = Tally::default();
        for path in &request.document_paths {
            let features = parse_document(path)?;
            tally.absorb(&features, &request.policy);
        }
        Ok(tally)
    }
}

#[async_trait]
impl ReportGenerator for CucumberStatusGenerator {
    fn name(&self) -> &str {
        "cucumber-status"
    }

    async fn generate(&self, request: &ReportRequest) -> anyhow::Result<bool> {
        let tally = Self::tally(request)?;
        info!(
            features = tally.features,
            scenarios = tally.scenarios,
            failed_scenarios = tally.failed_scenarios,
            passed_steps = tally.steps_with(StepStatus::Passed),
            failed_steps = tally.steps_with(StepStatus::Failed),
            skipped_steps = tally.steps_with(StepStatus::Skipped),
            undefined_steps = tally.steps_with(StepStatus::Undefined),
            "Evaluated cucumber results"
        );
        Ok(tally.all_passed())
    }
}
