//! covcull - coverage-driven test retention
//!
//! The `covcull` command fetches a C/C++ repository, asks a generator for
//! new unit tests, keeps the ones that compile and raise line coverage,
//! and deletes the rest.
//!
//! Exit codes: `0` completed run, `2` aborted run, `1` fatal error.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

use covcull_core::{
    prepare_workdir, AbortReason, CancelFlag, GcovOracle, Orchestrator, RunConfig, RunOutcome,
    ToolchainCompileGate, ToolchainConfig, DEFAULT_THRESHOLD_PCT,
};
use covcull_gen::{ChatGenerator, GeneratorConfig};

#[derive(Parser)]
#[command(name = "covcull")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Generate unit tests and keep only those that raise coverage", long_about = None)]
struct Cli {
    /// Repository URL or local path to clone
    repository: String,

    /// Working directory (reused as-is when it already has content)
    workdir: PathBuf,

    /// Only process the source or test with this file name
    #[arg(long = "file", value_name = "NAME")]
    file: Option<String>,

    /// Minimum coverage contribution, in percentage points, for a test to be kept
    #[arg(long, default_value_t = DEFAULT_THRESHOLD_PCT)]
    threshold: f64,

    /// Concurrent leave-one-out estimates
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Generator model name
    #[arg(long, env = "COVCULL_MODEL")]
    model: Option<String>,

    /// Generator API base URL
    #[arg(long, env = "COVCULL_API_BASE")]
    api_base: Option<String>,

    /// Build and prompt for MPI programs (adds -I/usr/include/mpi and -lmpi)
    #[arg(long, env = "COVCULL_MPI")]
    mpi: bool,

    /// Print the run outcome as JSON
    #[arg(long)]
    report_json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    covcull_core::init_tracing(cli.json, level);

    prepare_workdir(&cli.repository, &cli.workdir)
        .await
        .with_context(|| format!("Failed to prepare {}", cli.workdir.display()))?;

    let mut toolchain = ToolchainConfig::from_env().with_build_hints(&cli.workdir);
    if cli.mpi {
        toolchain = toolchain.with_mpi();
    }
    let config = RunConfig {
        threshold_pct: cli.threshold,
        jobs: cli.jobs,
        single_file: cli.file.clone(),
        toolchain: toolchain.clone(),
        ..RunConfig::default()
    };

    let mut gen_config = GeneratorConfig::from_env().with_mpi(cli.mpi);
    if let Some(model) = &cli.model {
        gen_config = gen_config.with_model(model);
    }
    if let Some(base) = &cli.api_base {
        gen_config = gen_config.with_base_url(base);
    }
    let generator = ChatGenerator::new(gen_config).context("Failed to create test generator")?;

    let gate = ToolchainCompileGate::new(toolchain.clone(), config.discovery.naming.clone());
    let oracle =
        GcovOracle::new(toolchain, config.discovery.clone()).restricted_to(cli.file.clone());

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping at the next stage boundary");
            on_signal.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        config,
        Arc::new(gate),
        Arc::new(oracle),
        Arc::new(generator),
    )
    .context("Invalid run configuration")?
    .with_cancel_flag(cancel);

    let outcome = orchestrator
        .run(&cli.workdir)
        .await
        .context("Run failed")?;

    if cli.report_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    Ok(match outcome {
        RunOutcome::Completed(report) => {
            info!(run_id = %report.run_id, "Run completed");
            ExitCode::SUCCESS
        }
        RunOutcome::Aborted(_) => ExitCode::from(2),
    })
}

fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(report) => {
            println!("{report}");
            if !report.failures.is_empty() {
                println!();
                println!("Notes:");
                for note in &report.failures {
                    let first = note.excerpt.lines().next().unwrap_or_default();
                    println!("  - [{:?}] {}: {}", note.kind, note.artifact, first);
                }
            }
        }
        RunOutcome::Aborted(aborted) => {
            println!("Run aborted: {}", aborted.reason);
            if let AbortReason::ExistingTestBroken { diagnostics, .. } = &aborted.reason {
                println!();
                println!("{diagnostics}");
            }
            if aborted.indeterminate {
                println!();
                println!("The working directory may be partially processed; re-run to re-measure.");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_args_and_defaults() {
        let cli = Cli::try_parse_from(["covcull", "https://example.com/r.git", "work"]).unwrap();
        assert_eq!(cli.repository, "https://example.com/r.git");
        assert_eq!(cli.workdir, PathBuf::from("work"));
        assert!(cli.file.is_none());
        assert_eq!(cli.threshold, DEFAULT_THRESHOLD_PCT);
        assert_eq!(cli.jobs, 1);
        assert!(!cli.report_json);
        assert!(!cli.mpi);
    }

    #[test]
    fn test_mpi_flag() {
        let cli = Cli::try_parse_from(["covcull", "repo", "work", "--mpi"]).unwrap();
        assert!(cli.mpi);
    }

    #[test]
    fn test_single_file_and_threshold() {
        let cli = Cli::try_parse_from([
            "covcull",
            "repo",
            "work",
            "--file",
            "dot_ref.cpp",
            "--threshold",
            "5",
            "-j",
            "4",
            "--report-json",
        ])
        .unwrap();
        assert_eq!(cli.file.as_deref(), Some("dot_ref.cpp"));
        assert_eq!(cli.threshold, 5.0);
        assert_eq!(cli.jobs, 4);
        assert!(cli.report_json);
    }

    #[test]
    fn test_workdir_is_required() {
        assert!(Cli::try_parse_from(["covcull", "repo"]).is_err());
    }
}
