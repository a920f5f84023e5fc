//! Retention policy: delete tests whose contribution is below the threshold.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::{CovcullError, Result};
use crate::measurement::ContributionRecord;
use crate::obs;

/// Default minimum contribution, in percentage points.
pub const DEFAULT_THRESHOLD_PCT: f64 = 2.5;

/// Keep/discard decision for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionDecision {
    Keep,
    Discard,
}

/// Minimum-contribution policy. The threshold is an inclusive lower bound:
/// a test is discarded only when `delta < threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    threshold_pct: f64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            threshold_pct: DEFAULT_THRESHOLD_PCT,
        }
    }
}

/// Outcome of applying the policy to a batch of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionOutcome {
    /// Tests deleted by this application.
    pub removed: Vec<String>,

    /// Tests kept.
    pub kept: Vec<String>,

    /// Tests that should have been deleted but could not be.
    pub errors: Vec<String>,
}

impl RetentionOutcome {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

impl RetentionPolicy {
    pub fn new(threshold_pct: f64) -> Result<Self> {
        if !threshold_pct.is_finite() || !(0.0..=100.0).contains(&threshold_pct) {
            return Err(CovcullError::InvalidConfig(format!(
                "retention threshold must be within [0, 100], got {threshold_pct}"
            )));
        }
        Ok(Self { threshold_pct })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold_pct
    }

    pub fn decide(&self, record: &ContributionRecord) -> RetentionDecision {
        if record.delta < self.threshold_pct {
            RetentionDecision::Discard
        } else {
            RetentionDecision::Keep
        }
    }

    /// Delete every test below the threshold, together with its build output.
    ///
    /// Records whose test is already gone are skipped, so applying the policy
    /// again to the same records removes nothing. A deletion failure is
    /// recorded and does not stop the rest of the batch.
    pub fn apply(&self, records: &[ContributionRecord], root: &Path) -> RetentionOutcome {
        let mut outcome = RetentionOutcome::default();

        for record in records {
            let id = record.test.identifier(root);
            if !record.test.exists() {
                continue;
            }
            match self.decide(record) {
                RetentionDecision::Keep => outcome.kept.push(id),
                RetentionDecision::Discard => match record.test.remove_with_output() {
                    Ok(true) => {
                        obs::emit_retention_removed(&id, record.delta, self.threshold_pct);
                        outcome.removed.push(id);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(artifact = %id, error = %e, "Failed to delete low-contribution test");
                        outcome.errors.push(format!("{id}: {e}"));
                    }
                },
            }
        }

        outcome
    }
}
