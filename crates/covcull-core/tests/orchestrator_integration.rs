use async_trait::async_trait;
use covcull_core::fakes::{AnnotationOracle, CannedGenerator, ScriptedCompileGate};
use covcull_core::{
    AbortReason, CancelFlag, CoverageMeasurement, GenerationRequest, Generator, Orchestrator,
    RunConfig, RunOutcome, GENERATED_HEADER,
};
use std::path::Path;
use std::sync::Arc;

const TEN_LINE_SOURCE: &str = "int a;\nint b;\nint c;\nint d;\nint e;\nint f;\nint g;\nint h;\nint i;\nint j;\n";

fn write(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).unwrap();
}

fn orchestrator(
    config: RunConfig,
    oracle: Arc<AnnotationOracle>,
    generator: Arc<dyn Generator>,
) -> Orchestrator {
    Orchestrator::new(config, Arc::new(ScriptedCompileGate::new()), oracle, generator).unwrap()
}

fn completed(outcome: RunOutcome) -> covcull_core::RunReport {
    match outcome {
        RunOutcome::Completed(report) => report,
        RunOutcome::Aborted(aborted) => panic!("run aborted: {}", aborted.reason),
    }
}

#[tokio::test]
async fn test_empty_directory_completes_with_zero_totals() {
    covcull_core::init_tracing(false, tracing::Level::DEBUG);
    let dir = tempfile::tempdir().unwrap();
    let generator = Arc::new(CannedGenerator::new(Some("// covers: 1")));

    let report = completed(
        orchestrator(
            RunConfig::default(),
            Arc::new(AnnotationOracle::new()),
            generator.clone(),
        )
        .run(dir.path())
        .await
        .unwrap(),
    );

    assert_eq!(report.before, CoverageMeasurement::empty());
    assert_eq!(report.after, CoverageMeasurement::empty());
    assert_eq!(report.removed_count, 0);
    assert_eq!(report.checked_count, 0);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_single_perfect_test_is_kept() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "math_ref.c", TEN_LINE_SOURCE);
    let generator = Arc::new(CannedGenerator::new(Some("// covers: 1-10")));

    let report = completed(
        orchestrator(
            RunConfig::default(),
            Arc::new(AnnotationOracle::new()),
            generator,
        )
        .run(dir.path())
        .await
        .unwrap(),
    );

    assert_eq!(report.before, CoverageMeasurement::new(0, 10).unwrap());
    assert_eq!(report.after, CoverageMeasurement::new(10, 10).unwrap());
    assert_eq!(report.coverage_gain_lines(), 10);
    assert_eq!(report.checked_count, 1);
    assert!((report.contributions[0].delta - 100.0).abs() < 1e-9);
    assert_eq!(report.removed_count, 0);

    let test = std::fs::read_to_string(dir.path().join("math_ref_test.c")).unwrap();
    assert!(test.contains(GENERATED_HEADER));
    assert!(test.contains("// covers: 1-10"));
}

#[tokio::test]
async fn test_useless_test_is_removed_with_its_binary() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "noop_ref.c", TEN_LINE_SOURCE);
    let generator = Arc::new(CannedGenerator::new(Some("int main(void) { return 0; }")));

    let report = completed(
        orchestrator(
            RunConfig::default(),
            Arc::new(AnnotationOracle::new()),
            generator,
        )
        .run(dir.path())
        .await
        .unwrap(),
    );

    assert_eq!(report.contributions.len(), 1);
    assert_eq!(report.contributions[0].delta, 0.0);
    assert_eq!(report.removed_count, 1);
    assert!(!dir.path().join("noop_ref_test.c").exists());
    assert!(!dir.path().join("noop_ref_test").exists());
    assert!(dir.path().join("noop_ref.c").exists());
}

#[tokio::test]
async fn test_non_compiling_candidate_never_reaches_measurement() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "bad_ref.c", TEN_LINE_SOURCE);
    let generator = Arc::new(CannedGenerator::new(Some("#error generated garbage\n// covers: 1-10")));

    let report = completed(
        orchestrator(
            RunConfig::default(),
            Arc::new(AnnotationOracle::new()),
            generator,
        )
        .run(dir.path())
        .await
        .unwrap(),
    );

    assert_eq!(report.gate_removed, vec!["bad_ref_test.c".to_string()]);
    assert!(report.contributions.is_empty());
    assert_eq!(report.after, CoverageMeasurement::new(0, 10).unwrap());
    assert!(!dir.path().join("bad_ref_test.c").exists());
}

#[tokio::test]
async fn test_failed_extension_reverts_existing_test() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "half_ref.c", TEN_LINE_SOURCE);
    let original = "// covers: 1-5\n";
    write(dir.path(), "half_ref_test.c", original);
    let generator = Arc::new(CannedGenerator::new(Some("#error broken extension")));

    let report = completed(
        orchestrator(
            RunConfig::default(),
            Arc::new(AnnotationOracle::new()),
            generator,
        )
        .run(dir.path())
        .await
        .unwrap(),
    );

    assert_eq!(report.gate_removed.len(), 1);
    assert_eq!(report.before, report.after);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("half_ref_test.c")).unwrap(),
        original
    );
}

#[tokio::test]
async fn test_broken_existing_test_aborts_before_measurement() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "old_ref.c", TEN_LINE_SOURCE);
    write(dir.path(), "old_ref_test.c", "#error stale test\n");
    let oracle = Arc::new(AnnotationOracle::new());
    let generator = Arc::new(CannedGenerator::new(Some("// covers: 1-10")));

    let outcome = orchestrator(RunConfig::default(), oracle.clone(), generator.clone())
        .run(dir.path())
        .await
        .unwrap();

    match outcome {
        RunOutcome::Aborted(aborted) => {
            assert!(matches!(
                aborted.reason,
                AbortReason::ExistingTestBroken { ref test, .. } if test == "old_ref_test.c"
            ));
            assert!(!aborted.indeterminate);
        }
        RunOutcome::Completed(_) => panic!("run should abort"),
    }
    assert_eq!(oracle.calls(), 0);
    assert_eq!(generator.calls(), 0);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("old_ref_test.c")).unwrap(),
        "#error stale test\n"
    );
}

#[tokio::test]
async fn test_generator_failure_is_recoverable() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a_ref.c", TEN_LINE_SOURCE);
    write(dir.path(), "b_ref.c", TEN_LINE_SOURCE);
    let generator = Arc::new(
        CannedGenerator::new(None)
            .with_response("a_ref.c", "// covers: 1-10")
            .failing_for("b_ref.c"),
    );

    let report = completed(
        orchestrator(
            RunConfig::default(),
            Arc::new(AnnotationOracle::new()),
            generator,
        )
        .run(dir.path())
        .await
        .unwrap(),
    );

    assert_eq!(report.generator_failures, 1);
    assert_eq!(report.checked_count, 1);
    assert_eq!(report.after, CoverageMeasurement::new(10, 20).unwrap());
    assert!(!dir.path().join("b_ref_test.c").exists());
}

#[tokio::test]
async fn test_mixed_candidates_with_parallel_estimates() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a_ref.c", "b_ref.c", "c_ref.c"] {
        write(dir.path(), name, TEN_LINE_SOURCE);
    }
    let generator = Arc::new(
        CannedGenerator::new(None)
            .with_response("a_ref.c", "// covers: 1-10")
            .with_response("b_ref.c", "// nothing covered")
            .with_response("c_ref.c", "// covers: 3"),
    );
    let config = RunConfig {
        jobs: 3,
        ..RunConfig::default()
    };

    let report = completed(
        orchestrator(config, Arc::new(AnnotationOracle::new()), generator)
            .run(dir.path())
            .await
            .unwrap(),
    );

    // 11 of 30 lines: a contributes 10/30, c contributes 1/30 (3.33 points).
    assert_eq!(report.after, CoverageMeasurement::new(11, 30).unwrap());
    let names: Vec<String> = report
        .contributions
        .iter()
        .map(|c| c.test.file_name())
        .collect();
    assert_eq!(names, vec!["a_ref_test.c", "b_ref_test.c", "c_ref_test.c"]);
    assert_eq!(report.removed_count, 1);
    assert!(dir.path().join("a_ref_test.c").exists());
    assert!(!dir.path().join("b_ref_test.c").exists());
    assert!(dir.path().join("c_ref_test.c").exists());
}

#[tokio::test]
async fn test_higher_threshold_removes_small_contributors() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["a_ref.c", "c_ref.c"] {
        write(dir.path(), name, TEN_LINE_SOURCE);
    }
    let generator = Arc::new(
        CannedGenerator::new(None)
            .with_response("a_ref.c", "// covers: 1-10")
            .with_response("c_ref.c", "// covers: 3"),
    );
    let config = RunConfig {
        threshold_pct: 10.0,
        ..RunConfig::default()
    };

    let report = completed(
        orchestrator(config, Arc::new(AnnotationOracle::new()), generator)
            .run(dir.path())
            .await
            .unwrap(),
    );

    assert_eq!(report.removed_count, 1);
    assert!(!dir.path().join("c_ref_test.c").exists());
}

#[tokio::test]
async fn test_single_file_filter_limits_generation() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a_ref.c", TEN_LINE_SOURCE);
    write(dir.path(), "b_ref.c", TEN_LINE_SOURCE);
    let generator = Arc::new(CannedGenerator::new(Some("// covers: 1-10")));
    let config = RunConfig {
        single_file: Some("b_ref.c".to_string()),
        ..RunConfig::default()
    };

    let report = completed(
        orchestrator(config, Arc::new(AnnotationOracle::new()), generator.clone())
            .run(dir.path())
            .await
            .unwrap(),
    );

    assert_eq!(generator.calls(), 1);
    assert_eq!(report.checked_count, 1);
    assert!(!dir.path().join("a_ref_test.c").exists());
    assert!(dir.path().join("b_ref_test.c").exists());
}

#[tokio::test]
async fn test_unknown_single_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a_ref.c", TEN_LINE_SOURCE);
    let config = RunConfig {
        single_file: Some("missing_ref.c".to_string()),
        ..RunConfig::default()
    };

    let result = orchestrator(
        config,
        Arc::new(AnnotationOracle::new()),
        Arc::new(CannedGenerator::new(Some("// covers: 1"))),
    )
    .run(dir.path())
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_second_run_over_pruned_directory_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a_ref.c", TEN_LINE_SOURCE);
    write(dir.path(), "b_ref.c", TEN_LINE_SOURCE);
    let first = Arc::new(
        CannedGenerator::new(None)
            .with_response("a_ref.c", "// covers: 1-10")
            .with_response("b_ref.c", "// nothing"),
    );
    let report = completed(
        orchestrator(RunConfig::default(), Arc::new(AnnotationOracle::new()), first)
            .run(dir.path())
            .await
            .unwrap(),
    );
    assert_eq!(report.removed_count, 1);
    let kept = std::fs::read_to_string(dir.path().join("a_ref_test.c")).unwrap();

    // No new candidates: nothing to check, nothing to remove.
    let second = Arc::new(CannedGenerator::new(None));
    let report = completed(
        orchestrator(RunConfig::default(), Arc::new(AnnotationOracle::new()), second)
            .run(dir.path())
            .await
            .unwrap(),
    );
    assert_eq!(report.before, report.after);
    assert_eq!(report.removed_count, 0);
    assert_eq!(report.checked_count, 0);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("a_ref_test.c")).unwrap(),
        kept
    );
}

#[tokio::test]
async fn test_cancel_before_start_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a_ref.c", TEN_LINE_SOURCE);
    let oracle = Arc::new(AnnotationOracle::new());
    let cancel = CancelFlag::new();
    cancel.cancel();

    let outcome = orchestrator(
        RunConfig::default(),
        oracle.clone(),
        Arc::new(CannedGenerator::new(Some("// covers: 1"))),
    )
    .with_cancel_flag(cancel)
    .run(dir.path())
    .await
    .unwrap();

    match outcome {
        RunOutcome::Aborted(aborted) => {
            assert_eq!(
                aborted.reason,
                AbortReason::Cancelled {
                    stage: "validate_existing".to_string()
                }
            );
        }
        RunOutcome::Completed(_) => panic!("run should be cancelled"),
    }
    assert_eq!(oracle.calls(), 0);
    assert!(!dir.path().join("a_ref_test.c").exists());
}

/// Generator that raises the cancel flag while producing a test.
struct CancellingGenerator {
    cancel: CancelFlag,
}

#[async_trait]
impl Generator for CancellingGenerator {
    async fn generate(&self, _request: &GenerationRequest) -> covcull_core::Result<String> {
        self.cancel.cancel();
        Ok("// covers: 1-10".to_string())
    }
}

#[tokio::test]
async fn test_cancel_during_acquisition_stops_before_gate() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a_ref.c", TEN_LINE_SOURCE);
    let oracle = Arc::new(AnnotationOracle::new());
    let cancel = CancelFlag::new();
    let generator = Arc::new(CancellingGenerator {
        cancel: cancel.clone(),
    });

    let outcome = orchestrator(RunConfig::default(), oracle.clone(), generator)
        .with_cancel_flag(cancel)
        .run(dir.path())
        .await
        .unwrap();

    match outcome {
        RunOutcome::Aborted(aborted) => {
            assert_eq!(
                aborted.reason,
                AbortReason::Cancelled {
                    stage: "gate_compile".to_string()
                }
            );
            assert!(aborted.indeterminate);
        }
        RunOutcome::Completed(_) => panic!("run should be cancelled"),
    }
    // Baseline only; the final measurement never ran.
    assert_eq!(oracle.calls(), 1);
}

#[tokio::test]
async fn test_outcome_serializes_for_json_output() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a_ref.c", TEN_LINE_SOURCE);
    let outcome = orchestrator(
        RunConfig::default(),
        Arc::new(AnnotationOracle::new()),
        Arc::new(CannedGenerator::new(Some("// covers: 1-10"))),
    )
    .run(dir.path())
    .await
    .unwrap();

    let json = serde_json::to_value(&outcome).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["after"]["covered"], 10);
    assert_eq!(json["removed_count"], 0);
}
