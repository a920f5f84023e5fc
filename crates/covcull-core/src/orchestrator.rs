//! Run orchestration.
//!
//! Stages run strictly in order over one working directory:
//!
//! `Discover → ValidateExisting → BaselineMeasure → AcquireCandidates →
//! GateCompile → FinalMeasure → Prune → Report`
//!
//! A pre-existing test that does not compile ends the run in
//! `ValidateExisting`, before any measurement or generator call. The
//! cancellation flag is checked at every stage boundary.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::artifact::{absolute_path, Artifact, CandidatePair};
use crate::compile_gate::CompileGate;
use crate::config::RunConfig;
use crate::discovery::{discover, filter_single};
use crate::error::{AbortReason, CovcullError, Result};
use crate::estimator::ContributionEstimator;
use crate::generator::{append_generated, GenerationRequest, Generator};
use crate::obs;
use crate::oracle::CoverageOracle;
use crate::process::excerpt;
use crate::report::{AbortedRun, FailureKind, FailureNote, RunOutcome, RunReport};

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Discover,
    ValidateExisting,
    BaselineMeasure,
    AcquireCandidates,
    GateCompile,
    FinalMeasure,
    Prune,
    Report,
}

impl RunStage {
    pub fn name(&self) -> &'static str {
        match self {
            RunStage::Discover => "discover",
            RunStage::ValidateExisting => "validate_existing",
            RunStage::BaselineMeasure => "baseline_measure",
            RunStage::AcquireCandidates => "acquire_candidates",
            RunStage::GateCompile => "gate_compile",
            RunStage::FinalMeasure => "final_measure",
            RunStage::Prune => "prune",
            RunStage::Report => "report",
        }
    }
}

/// Shared flag a caller raises to stop a run at the next stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A test produced or extended by the generator in this run.
#[derive(Debug, Clone)]
struct Candidate {
    test: Artifact,

    /// Content before generation; `None` when the file was created.
    previous: Option<String>,
}

/// Mutable bookkeeping for one run.
struct RunState {
    run_id: String,
    failures: Vec<FailureNote>,
    pruning_started: bool,
}

/// Sequences discovery, gating, measurement and pruning over a working directory.
pub struct Orchestrator {
    config: RunConfig,
    gate: Arc<dyn CompileGate>,
    oracle: Arc<dyn CoverageOracle>,
    generator: Arc<dyn Generator>,
    cancel: CancelFlag,
}

impl Orchestrator {
    pub fn new(
        config: RunConfig,
        gate: Arc<dyn CompileGate>,
        oracle: Arc<dyn CoverageOracle>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            gate,
            oracle,
            generator,
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Execute one full run over `workdir`.
    ///
    /// A relative `workdir` is resolved against the current directory once,
    /// before discovery, so every artifact path in the run is absolute.
    ///
    /// Returns `Err` only for failures that end the run without a terminal
    /// state (discovery errors, invalid configuration); aborts are `Ok`.
    pub async fn run(&self, workdir: &Path) -> Result<RunOutcome> {
        let workdir = absolute_path(workdir)?;
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.run_stages(&workdir, run_id).instrument(span).await
    }

    async fn run_stages(&self, workdir: &Path, run_id: String) -> Result<RunOutcome> {
        let start = Instant::now();
        let mut state = RunState {
            run_id,
            failures: Vec::new(),
            pruning_started: false,
        };
        let policy = self.config.retention_policy()?;

        // Discover
        self.enter(RunStage::Discover);
        let mut pairs = discover(workdir, &self.config.discovery)?;
        if let Some(name) = &self.config.single_file {
            pairs = filter_single(pairs, name)?;
        }
        obs::emit_run_started(&state.run_id, &workdir.display().to_string(), pairs.len());

        // ValidateExisting
        if let Some(aborted) = self.checkpoint(&mut state, RunStage::ValidateExisting) {
            return Ok(aborted);
        }
        if let Some(reason) = self.validate_existing(&pairs, workdir).await {
            return Ok(self.abort(state, reason));
        }

        // BaselineMeasure
        if let Some(aborted) = self.checkpoint(&mut state, RunStage::BaselineMeasure) {
            return Ok(aborted);
        }
        let before = self.oracle.measure(workdir).await?;
        obs::emit_measured("before", &before);

        // AcquireCandidates
        if let Some(aborted) = self.checkpoint(&mut state, RunStage::AcquireCandidates) {
            return Ok(aborted);
        }
        let (candidates, generator_failures) =
            self.acquire_candidates(&pairs, workdir, &mut state).await;

        // GateCompile
        if let Some(aborted) = self.checkpoint(&mut state, RunStage::GateCompile) {
            return Ok(aborted);
        }
        let (survivors, gate_removed) = self.gate_candidates(candidates, workdir, &mut state).await;

        // FinalMeasure
        if let Some(aborted) = self.checkpoint(&mut state, RunStage::FinalMeasure) {
            return Ok(aborted);
        }
        let after = self.oracle.measure(workdir).await?;
        obs::emit_measured("after", &after);

        // Prune
        if let Some(aborted) = self.checkpoint(&mut state, RunStage::Prune) {
            return Ok(aborted);
        }
        state.pruning_started = true;
        let estimator = ContributionEstimator::new(self.oracle.clone());
        let contributions = match estimator
            .estimate_all(&survivors, workdir, &after, self.config.jobs)
            .await
        {
            Ok(records) => records,
            Err(CovcullError::CleanupFailure { path, reason }) => {
                let reason = AbortReason::CleanupFailed {
                    path: path.display().to_string(),
                    reason,
                };
                return Ok(self.abort(state, reason));
            }
            Err(e) => return Err(e),
        };
        for record in contributions.iter().filter(|r| r.measurement_failed) {
            state.failures.push(FailureNote {
                kind: FailureKind::Oracle,
                artifact: record.test.identifier(workdir),
                excerpt: "contribution estimate failed; counted as zero".to_string(),
            });
        }
        let retention = policy.apply(&contributions, workdir);
        for error in &retention.errors {
            state.failures.push(FailureNote {
                kind: FailureKind::Filesystem,
                artifact: error.clone(),
                excerpt: "failed to delete low-contribution test".to_string(),
            });
        }

        // Report
        self.enter(RunStage::Report);
        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_run_finished(&before, &after, retention.removed_count(), duration_ms);

        Ok(RunOutcome::Completed(RunReport {
            run_id: state.run_id,
            before,
            after,
            removed_count: retention.removed_count(),
            checked_count: contributions.len(),
            gate_removed,
            generator_failures,
            contributions,
            failures: state.failures,
            threshold_pct: policy.threshold(),
            duration_ms,
            finished_at: Utc::now(),
        }))
    }

    fn enter(&self, stage: RunStage) {
        obs::emit_stage(stage.name());
    }

    /// Enter `stage` unless cancellation was requested.
    fn checkpoint(&self, state: &mut RunState, stage: RunStage) -> Option<RunOutcome> {
        if self.cancel.is_cancelled() {
            let reason = AbortReason::Cancelled {
                stage: stage.name().to_string(),
            };
            let state = RunState {
                run_id: std::mem::take(&mut state.run_id),
                failures: std::mem::take(&mut state.failures),
                pruning_started: state.pruning_started,
            };
            return Some(self.abort(state, reason));
        }
        self.enter(stage);
        None
    }

    fn abort(&self, state: RunState, reason: AbortReason) -> RunOutcome {
        obs::emit_run_aborted(&reason);
        let indeterminate = match &reason {
            AbortReason::ExistingTestBroken { .. } => false,
            AbortReason::Cancelled { .. } | AbortReason::CleanupFailed { .. } => true,
        };
        RunOutcome::Aborted(AbortedRun {
            run_id: state.run_id,
            reason,
            indeterminate: indeterminate || state.pruning_started,
            failures: state.failures,
        })
    }

    /// Compile every pre-existing test; the first failure aborts the run.
    async fn validate_existing(
        &self,
        pairs: &[CandidatePair],
        workdir: &Path,
    ) -> Option<AbortReason> {
        for pair in pairs.iter().filter(|p| p.has_test()) {
            let outcome = self.gate.compile(&pair.test, workdir).await;
            if !outcome.success {
                let id = pair.test.identifier(workdir);
                let diagnostics = excerpt(&outcome.diagnostics, self.config.excerpt_lines);
                obs::emit_compile_failed(&id, &diagnostics);
                return Some(AbortReason::ExistingTestBroken {
                    test: id,
                    diagnostics,
                });
            }
        }
        None
    }

    /// Ask the generator for tests for every pair and append the results.
    async fn acquire_candidates(
        &self,
        pairs: &[CandidatePair],
        workdir: &Path,
        state: &mut RunState,
    ) -> (Vec<Candidate>, usize) {
        let mut candidates = Vec::new();
        let mut generator_failures = 0usize;

        for pair in pairs {
            let source_id = pair.source.identifier(workdir);
            match self.acquire_one(pair).await {
                Ok(candidate) => {
                    debug!(
                        test = %candidate.test.identifier(workdir),
                        digest = %candidate.test.digest().unwrap_or_default(),
                        "Candidate acquired"
                    );
                    candidates.push(candidate);
                }
                Err(e) => {
                    let kind = match &e {
                        CovcullError::Filesystem { .. } => FailureKind::Filesystem,
                        _ => {
                            generator_failures += 1;
                            FailureKind::Generator
                        }
                    };
                    let message = excerpt(&e.to_string(), self.config.excerpt_lines);
                    obs::emit_generator_failed(&source_id, &message);
                    state.failures.push(FailureNote {
                        kind,
                        artifact: source_id,
                        excerpt: message,
                    });
                }
            }
        }

        info!(
            candidates = candidates.len(),
            generator_failures, "Candidate acquisition finished"
        );
        (candidates, generator_failures)
    }

    async fn acquire_one(&self, pair: &CandidatePair) -> Result<Candidate> {
        let source_content = pair.source.read_content()?;
        let previous = if pair.has_test() {
            Some(pair.test.read_content()?)
        } else {
            None
        };

        let request = GenerationRequest {
            source_path: pair.source.path.clone(),
            source_content,
            existing_test_content: previous.clone().unwrap_or_default(),
        };
        let generated = self.generator.generate(&request).await?;
        if generated.trim().is_empty() {
            return Err(CovcullError::GeneratorFailure {
                source_path: pair.source.path.display().to_string(),
                reason: "generator returned no test text".to_string(),
            });
        }

        append_generated(&pair.test.path, &generated)?;
        Ok(Candidate {
            test: pair.test.clone(),
            previous,
        })
    }

    /// Compile every candidate; failures are deleted (new files) or reverted
    /// to their validated content (extended files) before measurement.
    async fn gate_candidates(
        &self,
        candidates: Vec<Candidate>,
        workdir: &Path,
        state: &mut RunState,
    ) -> (Vec<Artifact>, Vec<String>) {
        let mut survivors = Vec::new();
        let mut removed = Vec::new();

        for candidate in candidates {
            let id = candidate.test.identifier(workdir);
            let outcome = self.gate.compile(&candidate.test, workdir).await;
            if outcome.success {
                survivors.push(candidate.test);
                continue;
            }

            let diagnostics = excerpt(&outcome.diagnostics, self.config.excerpt_lines);
            obs::emit_compile_failed(&id, &diagnostics);
            state.failures.push(FailureNote {
                kind: FailureKind::Compile,
                artifact: id.clone(),
                excerpt: diagnostics,
            });

            if let Err(e) = discard_candidate(&candidate) {
                state.failures.push(FailureNote {
                    kind: FailureKind::Filesystem,
                    artifact: id.clone(),
                    excerpt: e.to_string(),
                });
            }
            removed.push(id);
        }

        (survivors, removed)
    }
}

fn discard_candidate(candidate: &Candidate) -> Result<()> {
    match &candidate.previous {
        None => candidate.test.remove_with_output().map(|_| ()),
        Some(previous) => {
            std::fs::write(&candidate.test.path, previous)
                .map_err(|e| CovcullError::fs(&candidate.test.path, e))?;
            let output = candidate.test.build_output();
            match std::fs::remove_file(&output) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(CovcullError::fs(output, e)),
            }
        }
    }
}
