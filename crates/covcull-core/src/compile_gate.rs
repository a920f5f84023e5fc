//! Compile gate: does a test artifact build?
//!
//! Compile failures are ordinary outcomes here. The caller decides whether a
//! failure deletes the artifact or aborts the run.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::artifact::{absolute_path, Artifact, NamingRule};
use crate::error::Result;
use crate::process::{run_process, ProcessSpec};
use crate::toolchain::{Language, ToolchainConfig};

/// Verdict of one compile attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CompileOutcome {
    pub success: bool,

    /// Compiler output (or the fault that prevented compiling).
    pub diagnostics: String,

    /// Executable written on success.
    pub output: Option<PathBuf>,
}

impl CompileOutcome {
    pub fn passed(output: PathBuf, diagnostics: String) -> Self {
        Self {
            success: true,
            diagnostics,
            output: Some(output),
        }
    }

    pub fn failed(diagnostics: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostics: diagnostics.into(),
            output: None,
        }
    }
}

/// Builds a test artifact within its source context.
#[async_trait]
pub trait CompileGate: Send + Sync {
    /// Attempt to build `test`. Never fails: faults become `success = false`.
    async fn compile(&self, test: &Artifact, context_dir: &Path) -> CompileOutcome;
}

/// Compile gate backed by the configured C/C++ compiler.
#[derive(Debug, Clone)]
pub struct ToolchainCompileGate {
    toolchain: ToolchainConfig,
    naming: NamingRule,
}

impl ToolchainCompileGate {
    pub fn new(toolchain: ToolchainConfig, naming: NamingRule) -> Self {
        Self { toolchain, naming }
    }

    /// The compile command for `test`, writing the executable next to it.
    ///
    /// The compiler runs inside `context_dir`, so every path it receives is
    /// made absolute first.
    pub fn command_for(&self, test: &Artifact, context_dir: &Path) -> Result<ProcessSpec> {
        let lang = Language::of(&test.path);
        let context_dir = absolute_path(context_dir)?;
        let test_path = absolute_path(&test.path)?;
        let test_dir = test_path.parent().unwrap_or(&context_dir);
        let content = std::fs::read_to_string(&test_path).unwrap_or_default();

        let mut spec = ProcessSpec::new(
            "compile",
            self.toolchain.compiler_for(lang),
            self.toolchain.compile_timeout_secs,
        )
        .args(self.toolchain.flags_for(lang).iter().cloned())
        .args(self.toolchain.include_args(&[test_dir, &context_dir]))
        .arg(test_path.display().to_string());

        if let Some(source) = self.naming.source_path_for(&test_path) {
            if source.is_file() && !includes_file(&content, &source) {
                spec = spec.arg(source.display().to_string());
            }
        }

        Ok(spec
            .arg("-o")
            .arg(absolute_path(&test.build_output())?.display().to_string())
            .args(self.toolchain.link_flags.iter().cloned())
            .cwd(context_dir))
    }
}

#[async_trait]
impl CompileGate for ToolchainCompileGate {
    async fn compile(&self, test: &Artifact, context_dir: &Path) -> CompileOutcome {
        if !test.exists() {
            return CompileOutcome::failed(format!(
                "test artifact {} does not exist",
                test.path.display()
            ));
        }

        let spec = match self.command_for(test, context_dir) {
            Ok(spec) => spec,
            Err(e) => return CompileOutcome::failed(e.to_string()),
        };
        debug!(command = %spec.command_line(), "Compiling test");

        match run_process(&spec).await {
            Ok(outcome) if outcome.passed() => {
                CompileOutcome::passed(test.build_output(), outcome.stderr)
            }
            Ok(outcome) => CompileOutcome::failed(outcome.diagnostics()),
            Err(e) => CompileOutcome::failed(e.to_string()),
        }
    }
}

/// Whether `content` has an `#include` directive naming `file`'s file name.
pub fn includes_file(content: &str, file: &Path) -> bool {
    static INCLUDE: OnceLock<Regex> = OnceLock::new();
    let re = INCLUDE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*#\s*include\s*[<"]([^>"]+)[>"]"#).expect("static regex")
    });

    let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    re.captures_iter(content).any(|caps| {
        Path::new(&caps[1])
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n == name)
            .unwrap_or(false)
    })
}
