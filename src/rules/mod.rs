//! Rule Evaluation Engine.
//!
//! Applies a named [`profile::PreflightProfile`] to a
//! [`crate::quality::QualityResult`] and grades the outcome.

pub mod engine;
pub mod profile;

use serde::{Deserialize, Serialize};

pub use engine::{Finding, SkippedRule, evaluate, skipped_rules};
pub use profile::{CheckType, PreflightProfile, PreflightRule, ProfileCatalog, Severity, Threshold};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    PassWithWarnings,
    Fail,
}

/// `fail` on any error, else `pass_with_warnings` on any warning, else `pass`.
/// Info findings do not change the verdict.
pub fn verdict(findings: &[Finding]) -> Verdict {
    if findings.iter().any(|f| f.severity == Severity::Error) {
        Verdict::Fail
    } else if findings.iter().any(|f| f.severity == Severity::Warning) {
        Verdict::PassWithWarnings
    } else {
        Verdict::Pass
    }
}
