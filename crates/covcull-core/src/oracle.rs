//! Coverage oracle: line coverage of every candidate source in a directory.
//!
//! Each source is measured as an independent unit:
//! 1. Compile the source (and its test, if one exists) with `--coverage`
//!    into a fresh object directory
//! 2. Link and run the test binary
//! 3. Run gcov and classify every line of the source's `.gcov` report
//!
//! Object files and `.gcda` counters live in a per-unit temporary directory
//! that is discarded afterwards, so counters never accumulate across
//! measurements and the working directory is never written to.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::artifact::{absolute_path, CandidatePair};
use crate::compile_gate::includes_file;
use crate::discovery::{discover, filter_single, DiscoveryRule};
use crate::error::{CovcullError, Result};
use crate::measurement::CoverageMeasurement;
use crate::obs;
use crate::process::{run_process, ProcessSpec};
use crate::toolchain::{Language, ToolchainConfig, COVERAGE_FLAG};

/// Measures line coverage over a directory's current artifact set.
#[async_trait]
pub trait CoverageOracle: Send + Sync {
    /// Measure `directory`. Per-unit failures contribute zero; only a
    /// failure to enumerate the directory is an `Err`.
    async fn measure(&self, directory: &Path) -> Result<CoverageMeasurement>;
}

/// How gcov classified one source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Executed,
    NotExecuted,
    NonExecutable,
}

/// Classify one line of a `.gcov` report. Returns `None` for lines that do
/// not describe a source line (headers, branch and call summaries).
pub fn classify_gcov_line(line: &str) -> Option<LineClass> {
    let mut parts = line.splitn(3, ':');
    let count = parts.next()?.trim();
    let line_no: u64 = parts.next()?.trim().parse().ok()?;
    if line_no == 0 {
        return None;
    }

    match count {
        "-" => Some(LineClass::NonExecutable),
        "#####" | "=====" | "%%%%%" => Some(LineClass::NotExecuted),
        _ => {
            let count = count.trim_end_matches('*');
            if let Ok(n) = count.parse::<u64>() {
                return Some(if n > 0 {
                    LineClass::Executed
                } else {
                    LineClass::NotExecuted
                });
            }
            // Human-readable counts ("1.2k") only appear for executed lines.
            let numeric = count.trim_end_matches(|c: char| c.is_ascii_alphabetic());
            if !numeric.is_empty() && numeric != count && numeric.parse::<f64>().is_ok() {
                Some(LineClass::Executed)
            } else {
                None
            }
        }
    }
}

/// Count executed and instrumented lines in a `.gcov` report.
///
/// Executed lines count toward both counters, not-executed lines only toward
/// the total, and non-executable lines toward neither.
pub fn parse_gcov_report(text: &str) -> CoverageMeasurement {
    let (mut covered, mut total) = (0u64, 0u64);
    for line in text.lines() {
        match classify_gcov_line(line) {
            Some(LineClass::Executed) => {
                covered += 1;
                total += 1;
            }
            Some(LineClass::NotExecuted) => total += 1,
            Some(LineClass::NonExecutable) | None => {}
        }
    }
    CoverageMeasurement::from_tally(covered, total)
}

/// gcov-backed coverage oracle.
#[derive(Debug, Clone)]
pub struct GcovOracle {
    toolchain: ToolchainConfig,
    rule: DiscoveryRule,
    only: Option<String>,
}

impl GcovOracle {
    pub fn new(toolchain: ToolchainConfig, rule: DiscoveryRule) -> Self {
        Self {
            toolchain,
            rule,
            only: None,
        }
    }

    /// Restrict measurement to the single pair matching `name`.
    pub fn restricted_to(mut self, name: Option<String>) -> Self {
        self.only = name;
        self
    }

    async fn measure_unit(&self, pair: &CandidatePair, root: &Path) -> Result<CoverageMeasurement> {
        let scratch = tempfile::Builder::new()
            .prefix("covcull-obj-")
            .tempdir()
            .map_err(|e| CovcullError::fs(std::env::temp_dir(), e))?;
        let obj_dir = scratch.path();

        let source = absolute_path(&pair.source.path)?;
        let unit_name = pair.source.file_name();

        let gcov_target = if pair.test.exists() {
            let test = absolute_path(&pair.test.path)?;
            let content = pair.test.read_content()?;

            let mut objects = Vec::new();
            let target = if includes_file(&content, &source) {
                test.clone()
            } else {
                objects.push(self.compile_object(&source, root, obj_dir, &unit_name).await?);
                source.clone()
            };
            objects.push(self.compile_object(&test, root, obj_dir, &unit_name).await?);

            let exe = self.link(&objects, Language::of(&test), obj_dir, &unit_name).await?;
            self.run_binary(&exe, source.parent().unwrap_or(root), &unit_name)
                .await?;
            target
        } else {
            // No test: compile only, so every instrumented line reads as unexecuted.
            self.compile_object(&source, root, obj_dir, &unit_name).await?;
            source.clone()
        };

        let gcov = ProcessSpec::new(
            "gcov",
            &self.toolchain.coverage_tool,
            self.toolchain.coverage_timeout_secs,
        )
        .arg("-o")
        .arg(obj_dir.display().to_string())
        .arg(gcov_target.display().to_string())
        .cwd(obj_dir);
        let outcome = run_process(&gcov).await?;
        if !outcome.passed() {
            return Err(CovcullError::OracleFailure {
                artifact: unit_name,
                reason: outcome.diagnostic_excerpt(20),
            });
        }

        let report_path = obj_dir.join(format!("{unit_name}.gcov"));
        let report = std::fs::read_to_string(&report_path).map_err(|e| {
            CovcullError::OracleFailure {
                artifact: unit_name.clone(),
                reason: format!("no gcov report at {}: {e}", report_path.display()),
            }
        })?;

        let measurement = parse_gcov_report(&report);
        debug!(unit = %unit_name, %measurement, "Measured unit");
        Ok(measurement)
    }

    async fn compile_object(
        &self,
        file: &Path,
        root: &Path,
        obj_dir: &Path,
        unit: &str,
    ) -> Result<PathBuf> {
        let lang = Language::of(file);
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unit".to_string());
        let object = obj_dir.join(format!("{stem}.o"));
        let parent = file.parent().unwrap_or(root);

        let spec = ProcessSpec::new(
            "instrumented-compile",
            self.toolchain.compiler_for(lang),
            self.toolchain.compile_timeout_secs,
        )
        .args(self.toolchain.flags_for(lang).iter().cloned())
        .arg(COVERAGE_FLAG)
        .args(self.toolchain.include_args(&[parent, root]))
        .arg("-c")
        .arg(file.display().to_string())
        .arg("-o")
        .arg(object.display().to_string())
        .cwd(obj_dir);

        self.require(&spec, unit).await?;
        Ok(object)
    }

    async fn link(
        &self,
        objects: &[PathBuf],
        lang: Language,
        obj_dir: &Path,
        unit: &str,
    ) -> Result<PathBuf> {
        let exe = obj_dir.join("unit_exec");
        let spec = ProcessSpec::new(
            "instrumented-link",
            self.toolchain.compiler_for(lang),
            self.toolchain.compile_timeout_secs,
        )
        .arg(COVERAGE_FLAG)
        .args(objects.iter().map(|o| o.display().to_string()))
        .arg("-o")
        .arg(exe.display().to_string())
        .args(self.toolchain.link_flags.iter().cloned())
        .cwd(obj_dir);

        self.require(&spec, unit).await?;
        Ok(exe)
    }

    async fn run_binary(&self, exe: &Path, cwd: &Path, unit: &str) -> Result<()> {
        let spec = ProcessSpec::new(
            "instrumented-run",
            exe.display().to_string(),
            self.toolchain.run_timeout_secs,
        )
        .cwd(cwd);
        self.require(&spec, unit).await
    }

    async fn require(&self, spec: &ProcessSpec, unit: &str) -> Result<()> {
        let outcome = run_process(spec).await?;
        if outcome.passed() {
            Ok(())
        } else {
            Err(CovcullError::OracleFailure {
                artifact: unit.to_string(),
                reason: format!("{}: {}", spec.label, outcome.diagnostic_excerpt(20)),
            })
        }
    }
}

#[async_trait]
impl CoverageOracle for GcovOracle {
    async fn measure(&self, directory: &Path) -> Result<CoverageMeasurement> {
        let directory = absolute_path(directory)?;
        let directory = directory.as_path();
        let mut pairs = discover(directory, &self.rule)?;
        if let Some(name) = &self.only {
            pairs = filter_single(pairs, name)?;
        }

        let mut total = CoverageMeasurement::empty();
        for pair in &pairs {
            match self.measure_unit(pair, directory).await {
                Ok(m) => total = total.merge(&m),
                Err(e) => obs::emit_oracle_unit_failed(
                    &pair.source.identifier(directory),
                    &e.to_string(),
                ),
            }
        }
        Ok(total)
    }
}
