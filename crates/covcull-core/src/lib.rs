//! covcull Core Library
//!
//! Coverage-driven test retention: generated tests are gated by a compiler,
//! measured with gcov and kept only when they add enough coverage.

pub mod artifact;
pub mod compile_gate;
pub mod config;
pub mod discovery;
pub mod error;
pub mod estimator;
pub mod fakes;
pub mod generator;
pub mod measurement;
pub mod obs;
pub mod oracle;
pub mod orchestrator;
pub mod process;
pub mod repo;
pub mod report;
pub mod retention;
pub mod telemetry;
pub mod toolchain;

pub use artifact::{absolute_path, Artifact, ArtifactRole, CandidatePair, NamingRule};
pub use compile_gate::{CompileGate, CompileOutcome, ToolchainCompileGate};
pub use config::RunConfig;
pub use discovery::{discover, filter_single, DiscoveryRule};
pub use error::{AbortReason, CovcullError, Result};
pub use estimator::ContributionEstimator;
pub use generator::{append_generated, GenerationRequest, Generator, GENERATED_HEADER};
pub use measurement::{percentage_delta, ContributionRecord, CoverageMeasurement};
pub use oracle::{parse_gcov_report, CoverageOracle, GcovOracle};
pub use orchestrator::{CancelFlag, Orchestrator, RunStage};
pub use process::{run_process, ProcessOutcome, ProcessSpec};
pub use repo::prepare_workdir;
pub use report::{AbortedRun, FailureKind, FailureNote, RunOutcome, RunReport};
pub use retention::{RetentionDecision, RetentionOutcome, RetentionPolicy, DEFAULT_THRESHOLD_PCT};
pub use telemetry::init_tracing;
pub use toolchain::{BuildHints, Language, ToolchainConfig, MPI_INCLUDE_DIR, MPI_LIBRARY};
