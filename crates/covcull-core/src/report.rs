//! Run report and outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AbortReason;
use crate::measurement::{ContributionRecord, CoverageMeasurement};

/// Kind of a recoverable failure noted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Compile,
    Oracle,
    Generator,
    Filesystem,
}

/// A recoverable failure, with the artifact it concerns and a diagnostic excerpt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNote {
    pub kind: FailureKind,
    pub artifact: String,
    pub excerpt: String,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: String,

    /// Coverage before any new test was added.
    pub before: CoverageMeasurement,

    /// Coverage after compile gating, before pruning.
    pub after: CoverageMeasurement,

    /// Tests deleted by the retention policy.
    pub removed_count: usize,

    /// Tests whose contribution was estimated (failed estimates included).
    pub checked_count: usize,

    /// Candidates discarded by the compile gate.
    pub gate_removed: Vec<String>,

    /// Sources for which the generator produced nothing.
    pub generator_failures: usize,

    pub contributions: Vec<ContributionRecord>,

    pub failures: Vec<FailureNote>,

    pub threshold_pct: f64,

    pub duration_ms: u64,

    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// Additional covered lines, after minus before.
    pub fn coverage_gain_lines(&self) -> i64 {
        self.after.covered() as i64 - self.before.covered() as i64
    }

    /// Number of contribution estimates that fell back to zero.
    pub fn failed_estimates(&self) -> usize {
        self.contributions
            .iter()
            .filter(|c| c.measurement_failed)
            .count()
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Before coverage: {}", self.before)?;
        writeln!(f, "After coverage:  {}", self.after)?;
        writeln!(
            f,
            "Test coverage improvement: {} more lines covered.",
            self.coverage_gain_lines()
        )?;
        writeln!(
            f,
            "Tests checked: {} ({} failed to measure)",
            self.checked_count,
            self.failed_estimates()
        )?;
        writeln!(
            f,
            "Tests removed by compile gate: {}",
            self.gate_removed.len()
        )?;
        write!(
            f,
            "Tests removed for low coverage impact (< {:.2}%): {}",
            self.threshold_pct, self.removed_count
        )
    }
}

/// A run that stopped before its report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AbortedRun {
    pub run_id: String,
    pub reason: AbortReason,

    /// Whether the working directory may be partially pruned; re-measure
    /// before trusting any totals.
    pub indeterminate: bool,

    pub failures: Vec<FailureNote>,
}

/// Terminal state of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed(RunReport),
    Aborted(AbortedRun),
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed(_))
    }

    pub fn report(&self) -> Option<&RunReport> {
        match self {
            RunOutcome::Completed(r) => Some(r),
            RunOutcome::Aborted(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Artifact;

    fn sample() -> RunReport {
        RunReport {
            run_id: "run123".to_string(),
            before: CoverageMeasurement::new(0, 10).unwrap(),
            after: CoverageMeasurement::new(10, 10).unwrap(),
            removed_count: 1,
            checked_count: 2,
            gate_removed: vec!["bad_ref_test.cpp".to_string()],
            generator_failures: 0,
            contributions: vec![
                ContributionRecord::new(Artifact::test("a_ref_test.cpp"), 100.0),
                ContributionRecord::failed(Artifact::test("b_ref_test.cpp")),
            ],
            failures: vec![],
            threshold_pct: 2.5,
            duration_ms: 300,
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_report_counts() {
        let report = sample();
        assert_eq!(report.coverage_gain_lines(), 10);
        assert_eq!(report.failed_estimates(), 1);
    }

    #[test]
    fn test_report_display() {
        let text = sample().to_string();
        assert!(text.contains("Before coverage: 0/10 lines covered (0.00%)"));
        assert!(text.contains("10 more lines covered"));
        assert!(text.contains("(< 2.50%): 1"));
    }

    #[test]
    fn test_outcome_json_has_status_tag() {
        let outcome = RunOutcome::Completed(sample());
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["status"], "completed");
        assert_eq!(v["removed_count"], 1);
        assert_eq!(v["before"]["total"], 10);
    }
}
