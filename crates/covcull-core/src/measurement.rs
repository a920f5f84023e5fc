//! Coverage snapshots and per-test contribution records.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;
use crate::error::{CovcullError, Result};

/// Line coverage over one directory at one instant.
///
/// Invariant: `covered <= total`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CoverageMeasurement {
    covered: u64,
    total: u64,
}

impl CoverageMeasurement {
    pub fn new(covered: u64, total: u64) -> Result<Self> {
        if covered > total {
            return Err(CovcullError::OracleFailure {
                artifact: "<measurement>".to_string(),
                reason: format!("covered lines ({covered}) exceed total lines ({total})"),
            });
        }
        Ok(Self { covered, total })
    }

    /// Build from counters that are covered <= total by construction.
    pub(crate) fn from_tally(covered: u64, total: u64) -> Self {
        debug_assert!(covered <= total);
        Self {
            covered: covered.min(total),
            total,
        }
    }

    /// The "no measurable lines" state.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn covered(&self) -> u64 {
        self.covered
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Covered share in percent; 0 when there are no measurable lines.
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.covered as f64 / self.total as f64 * 100.0
        }
    }

    /// Sum of two measurements over disjoint artifact sets.
    pub fn merge(&self, other: &CoverageMeasurement) -> CoverageMeasurement {
        CoverageMeasurement {
            covered: self.covered + other.covered,
            total: self.total + other.total,
        }
    }
}

impl std::fmt::Display for CoverageMeasurement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} lines covered ({:.2}%)",
            self.covered,
            self.total,
            self.percentage()
        )
    }
}

/// Percentage-point difference between two measurements, `with - without`.
pub fn percentage_delta(with: &CoverageMeasurement, without: &CoverageMeasurement) -> f64 {
    (with.percentage() - without.percentage()).clamp(-100.0, 100.0)
}

/// Coverage contribution attributed to one test by leave-one-out comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContributionRecord {
    pub test: Artifact,

    /// Percentage points, always within `[-100, 100]`.
    pub delta: f64,

    /// Whether the estimate fell back to zero because measurement failed.
    #[serde(default)]
    pub measurement_failed: bool,
}

impl ContributionRecord {
    pub fn new(test: Artifact, delta: f64) -> Self {
        let delta = if delta.is_finite() {
            delta.clamp(-100.0, 100.0)
        } else {
            0.0
        };
        Self {
            test,
            delta,
            measurement_failed: false,
        }
    }

    /// Zero contribution recorded for a test whose estimation failed.
    pub fn failed(test: Artifact) -> Self {
        Self {
            test,
            delta: 0.0,
            measurement_failed: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_covered_above_total() {
        assert!(CoverageMeasurement::new(11, 10).is_err());
        assert!(CoverageMeasurement::new(10, 10).is_ok());
    }

    #[test]
    fn test_percentage_bounds() {
        assert_eq!(CoverageMeasurement::empty().percentage(), 0.0);
        assert_eq!(CoverageMeasurement::new(0, 0).unwrap().percentage(), 0.0);
        assert_eq!(CoverageMeasurement::new(10, 10).unwrap().percentage(), 100.0);
        assert_eq!(CoverageMeasurement::new(1, 4).unwrap().percentage(), 25.0);

        for total in 0..20u64 {
            for covered in 0..=total {
                let p = CoverageMeasurement::new(covered, total).unwrap().percentage();
                assert!((0.0..=100.0).contains(&p));
            }
        }
    }

    #[test]
    fn test_merge_adds_counters() {
        let a = CoverageMeasurement::new(3, 10).unwrap();
        let b = CoverageMeasurement::new(2, 5).unwrap();
        assert_eq!(a.merge(&b), CoverageMeasurement::new(5, 15).unwrap());
        assert_eq!(a.merge(&CoverageMeasurement::empty()), a);
    }

    #[test]
    fn test_display_formats_two_decimals() {
        let m = CoverageMeasurement::new(1, 3).unwrap();
        assert_eq!(m.to_string(), "1/3 lines covered (33.33%)");
    }

    #[test]
    fn test_percentage_delta() {
        let full = CoverageMeasurement::new(10, 10).unwrap();
        let none = CoverageMeasurement::new(0, 10).unwrap();
        assert_eq!(percentage_delta(&full, &none), 100.0);
        assert_eq!(percentage_delta(&none, &full), -100.0);
        assert_eq!(percentage_delta(&full, &full), 0.0);
    }

    #[test]
    fn test_contribution_record_clamps() {
        let t = Artifact::test("a_test.c");
        assert_eq!(ContributionRecord::new(t.clone(), 250.0).delta, 100.0);
        assert_eq!(ContributionRecord::new(t.clone(), f64::NAN).delta, 0.0);
        let failed = ContributionRecord::failed(t);
        assert_eq!(failed.delta, 0.0);
        assert!(failed.measurement_failed);
    }
}
