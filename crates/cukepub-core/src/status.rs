//! Build verdict resolution.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GenerationFailure;
use crate::invoker::ReportOutcome;

/// Terminal build status written to the host.
///
/// There is no severity order between these. `NotBuilt` means nothing was
/// evaluated at all.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Success,
    Unstable,
    Failure,
    NotBuilt,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Success => "SUCCESS",
            Verdict::Unstable => "UNSTABLE",
            Verdict::Failure => "FAILURE",
            Verdict::NotBuilt => "NOT_BUILT",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved verdict plus how it was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub verdict: Verdict,

    /// SUCCESS because no result documents existed, not because any passed.
    pub no_results: bool,
}

/// Verdict resolution rules.
pub struct StatusResolver;

impl StatusResolver {
    /// Resolve the build verdict.
    ///
    /// Rules, in order:
    /// - no result documents: SUCCESS (nothing to evaluate)
    /// - generation failed: FAILURE
    /// - all scenarios passed: SUCCESS
    /// - otherwise: UNSTABLE when `demote_failures` is set, else FAILURE
    ///
    /// `outcome` is ignored when `document_count` is zero.
    pub fn resolve(
        document_count: usize,
        outcome: Option<&Result<ReportOutcome, GenerationFailure>>,
        demote_failures: bool,
    ) -> Resolution {
        if document_count == 0 {
            return Resolution {
                verdict: Verdict::Success,
                no_results: true,
            };
        }

        let verdict = match outcome {
            None | Some(Err(_)) => Verdict::Failure,
            Some(Ok(ReportOutcome { all_passed: true })) => Verdict::Success,
            Some(Ok(ReportOutcome { all_passed: false })) => {
                if demote_failures {
                    Verdict::Unstable
                } else {
                    Verdict::Failure
                }
            }
        };

        Resolution {
            verdict,
            no_results: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passed(all_passed: bool) -> Result<ReportOutcome, GenerationFailure> {
        Ok(ReportOutcome { all_passed })
    }

    fn failed() -> Result<ReportOutcome, GenerationFailure> {
        Err(GenerationFailure {
            cause: "boom".to_string(),
        })
    }

    #[test]
    fn test_no_documents_is_success_for_every_policy() {
        for demote in [false, true] {
            for outcome in [None, Some(passed(false)), Some(failed())] {
                let res = StatusResolver::resolve(0, outcome.as_ref(), demote);
                assert_eq!(res.verdict, Verdict::Success);
                assert!(res.no_results);
            }
        }
    }

    #[test]
    fn test_all_passed_is_success() {
        for demote in [false, true] {
            let res = StatusResolver::resolve(3, Some(&passed(true)), demote);
            assert_eq!(res.verdict, Verdict::Success);
            assert!(!res.no_results);
        }
    }

    #[test]
    fn test_failed_scenarios_is_failure() {
        let res = StatusResolver::resolve(2, Some(&passed(false)), false);
        assert_eq!(res.verdict, Verdict::Failure);
    }

    #[test]
    fn test_failed_scenarios_demoted_to_unstable() {
        let res = StatusResolver::resolve(2, Some(&passed(false)), true);
        assert_eq!(res.verdict, Verdict::Unstable);
    }

    #[test]
    fn test_generation_failure_ignores_demotion() {
        for demote in [false, true] {
            let res = StatusResolver::resolve(1, Some(&failed()), demote);
            assert_eq!(res.verdict, Verdict::Failure);
        }
    }

    #[test]
    fn test_verdict_strings() {
        assert_eq!(Verdict::NotBuilt.to_string(), "NOT_BUILT");
        assert_eq!(
            serde_json::to_string(&Verdict::Unstable).unwrap(),
            "\"UNSTABLE\""
        );
    }
}
