//! Structured observability hooks for covcull run lifecycle events.
//!
//! This module provides:
//! - A run-scoped tracing span via [`run_span`]
//! - Emission functions for stage transitions, compile failures, oracle
//!   unit failures, contribution estimates and retention deletions
//!
//! Every event carries a stable `event` field so JSON log lines can be
//! filtered without parsing messages.

use tracing::{info, warn};

use crate::measurement::CoverageMeasurement;

/// Span tagged with the run_id; instrument the run future with it so every
/// event of the run carries the id across await points.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("covcull.run", run_id = %run_id)
}

/// Emit event: run started over a working directory.
pub fn emit_run_started(run_id: &str, workdir: &str, candidates: usize) {
    info!(event = "run.started", run_id = %run_id, workdir = %workdir, candidates = candidates);
}

/// Emit event: the orchestrator entered a stage.
pub fn emit_stage(stage: &str) {
    info!(event = "run.stage", stage = %stage);
}

/// Emit event: run aborted before reporting.
pub fn emit_run_aborted(reason: &dyn std::fmt::Display) {
    warn!(event = "run.aborted", reason = %reason);
}

/// Emit event: run finished with its before/after snapshots.
pub fn emit_run_finished(
    before: &CoverageMeasurement,
    after: &CoverageMeasurement,
    removed: usize,
    duration_ms: u64,
) {
    info!(
        event = "run.finished",
        before = %before,
        after = %after,
        removed = removed,
        duration_ms = duration_ms,
    );
}

/// Emit event: a test failed to compile.
pub fn emit_compile_failed(artifact: &str, excerpt: &str) {
    warn!(event = "compile.failed", artifact = %artifact, diagnostics = %excerpt);
}

/// Emit event: one unit contributed zero because its coverage run failed.
pub fn emit_oracle_unit_failed(artifact: &str, reason: &str) {
    warn!(event = "oracle.unit_failed", artifact = %artifact, reason = %reason);
}

/// Emit event: a coverage measurement completed.
pub fn emit_measured(label: &str, measurement: &CoverageMeasurement) {
    info!(
        event = "oracle.measured",
        label = %label,
        covered = measurement.covered(),
        total = measurement.total(),
        percent = measurement.percentage(),
    );
}

/// Emit event: a leave-one-out estimate completed.
pub fn emit_estimate(artifact: &str, delta: f64, failed: bool) {
    info!(event = "estimate.completed", artifact = %artifact, delta = delta, failed = failed);
}

/// Emit event: the retention policy deleted a test.
pub fn emit_retention_removed(artifact: &str, delta: f64, threshold: f64) {
    info!(
        event = "retention.removed",
        artifact = %artifact,
        delta = %format!("{delta:.2}"),
        threshold = threshold,
    );
}

/// Emit event: the generator produced nothing for a source.
pub fn emit_generator_failed(source: &str, reason: &str) {
    warn!(event = "generator.failed", source = %source, reason = %reason);
}
