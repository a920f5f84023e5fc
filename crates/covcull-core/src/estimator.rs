//! Leave-one-out contribution estimation.
//!
//! A test's contribution is the coverage percentage of the directory with
//! the test present (the baseline snapshot) minus the percentage of an
//! isolated copy with only that test set aside. The live directory is never
//! touched; each estimate owns its scratch copy.

use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::artifact::Artifact;
use crate::error::{CovcullError, Result};
use crate::measurement::{percentage_delta, ContributionRecord, CoverageMeasurement};
use crate::obs;
use crate::oracle::CoverageOracle;

/// Suffix given to the candidate while it is set aside in the scratch copy.
pub const ASIDE_SUFFIX: &str = ".covcull-aside";

/// Computes per-test coverage deltas against a fixed baseline.
#[derive(Clone)]
pub struct ContributionEstimator {
    oracle: Arc<dyn CoverageOracle>,
}

impl ContributionEstimator {
    pub fn new(oracle: Arc<dyn CoverageOracle>) -> Self {
        Self { oracle }
    }

    /// Percentage-point delta of `test` within `directory`, always in `[-100, 100]`.
    ///
    /// Errors: `CleanupFailure` when the scratch copy cannot be removed
    /// (callers must escalate), any other error is local to this test.
    pub async fn estimate(
        &self,
        test: &Artifact,
        directory: &Path,
        baseline: &CoverageMeasurement,
    ) -> Result<f64> {
        let scratch = tempfile::Builder::new()
            .prefix("covcull-loo-")
            .tempdir()
            .map_err(|e| CovcullError::fs(std::env::temp_dir(), e))?;
        let scratch_path = scratch.path().to_path_buf();

        let reduced = self.measure_without(test, directory, &scratch_path).await;

        scratch
            .close()
            .map_err(|e| CovcullError::CleanupFailure {
                path: scratch_path.clone(),
                reason: e.to_string(),
            })?;

        let reduced = reduced?;
        let delta = percentage_delta(baseline, &reduced);
        debug!(test = %test.file_name(), %baseline, %reduced, delta, "Leave-one-out estimate");
        Ok(delta)
    }

    /// Estimate every test with up to `jobs` estimates in flight.
    ///
    /// Recoverable failures become zero-contribution records; anything else
    /// (a cleanup failure in particular) aborts the whole batch. Output
    /// order matches `tests`.
    pub async fn estimate_all(
        &self,
        tests: &[Artifact],
        directory: &Path,
        baseline: &CoverageMeasurement,
        jobs: usize,
    ) -> Result<Vec<ContributionRecord>> {
        let results: Vec<(Artifact, Result<f64>)> = stream::iter(tests.iter().cloned())
            .map(|test| async move {
                let result = self.estimate(&test, directory, baseline).await;
                (test, result)
            })
            .buffered(jobs.max(1))
            .collect()
            .await;

        let mut records = Vec::with_capacity(results.len());
        for (test, result) in results {
            let id = test.identifier(directory);
            match result {
                Ok(delta) => {
                    let record = ContributionRecord::new(test, delta);
                    obs::emit_estimate(&id, record.delta, false);
                    records.push(record);
                }
                Err(e) if !e.is_recoverable() => return Err(e),
                Err(e) => {
                    obs::emit_oracle_unit_failed(&id, &e.to_string());
                    obs::emit_estimate(&id, 0.0, true);
                    records.push(ContributionRecord::failed(test));
                }
            }
        }
        Ok(records)
    }

    async fn measure_without(
        &self,
        test: &Artifact,
        directory: &Path,
        scratch: &Path,
    ) -> Result<CoverageMeasurement> {
        let directory = std::fs::canonicalize(directory).map_err(|e| CovcullError::fs(directory, e))?;
        let test_path = std::fs::canonicalize(&test.path).map_err(|e| CovcullError::fs(&test.path, e))?;
        let relative = test_path.strip_prefix(&directory).map_err(|_| {
            CovcullError::InvalidConfig(format!(
                "{} is outside {}",
                test_path.display(),
                directory.display()
            ))
        })?;

        copy_tree(&directory, scratch)?;

        let mut aside = SetAside::new(scratch.join(relative))?;
        let measured = self.oracle.measure(scratch).await;
        aside.restore()?;
        measured
    }
}

/// Candidate renamed out of the oracle's view; restored on `restore` or drop.
struct SetAside {
    original: PathBuf,
    aside: PathBuf,
    restored: bool,
}

impl SetAside {
    fn new(original: PathBuf) -> Result<Self> {
        let mut name = original.as_os_str().to_owned();
        name.push(ASIDE_SUFFIX);
        let aside = PathBuf::from(name);
        std::fs::rename(&original, &aside).map_err(|e| CovcullError::fs(&original, e))?;
        Ok(Self {
            original,
            aside,
            restored: false,
        })
    }

    fn restore(&mut self) -> Result<()> {
        if !self.restored {
            std::fs::rename(&self.aside, &self.original)
                .map_err(|e| CovcullError::fs(&self.aside, e))?;
            self.restored = true;
        }
        Ok(())
    }
}

impl Drop for SetAside {
    fn drop(&mut self) {
        if !self.restored {
            let _ = std::fs::rename(&self.aside, &self.original);
        }
    }
}

/// Recursively copy regular files from `from` into `to`, skipping hidden directories.
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    std::fs::create_dir_all(to).map_err(|e| CovcullError::fs(to, e))?;

    for entry in std::fs::read_dir(from).map_err(|e| CovcullError::fs(from, e))? {
        let entry = entry.map_err(|e| CovcullError::fs(from, e))?;
        let path = entry.path();
        let target = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| CovcullError::fs(&path, e))?;

        if file_type.is_dir() {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden {
                copy_tree(&path, &target)?;
            }
        } else if file_type.is_file() {
            std::fs::copy(&path, &target).map_err(|e| CovcullError::fs(&path, e))?;
        }
    }
    Ok(())
}
