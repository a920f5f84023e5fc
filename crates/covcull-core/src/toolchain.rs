//! Compiler and coverage-tool configuration.
//!
//! The toolchain is resolved once per run: defaults, then environment
//! overrides, then hints from a `Makefile` in the working directory.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Flags that turn on gcov instrumentation at compile and link time.
pub const COVERAGE_FLAG: &str = "--coverage";

/// Header directory of the system MPI installation.
pub const MPI_INCLUDE_DIR: &str = "/usr/include/mpi";

/// Linker flag for the MPI runtime.
pub const MPI_LIBRARY: &str = "-lmpi";

/// Build-description file consulted for compiler hints.
pub const BUILD_DESCRIPTION_FILE: &str = "Makefile";

/// Language of a translation unit, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    C,
    Cxx,
}

impl Language {
    pub fn of(path: &Path) -> Language {
        match path.extension().and_then(|e| e.to_str()) {
            Some("c") => Language::C,
            _ => Language::Cxx,
        }
    }
}

/// Compiler, flags and timeouts used by the compile gate and coverage oracle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolchainConfig {
    /// C++ compiler.
    pub cxx: String,

    /// C compiler.
    pub cc: String,

    /// Flags for C++ translation units.
    pub cxx_flags: Vec<String>,

    /// Flags for C translation units.
    pub c_flags: Vec<String>,

    /// Flags appended at link time (libraries).
    pub link_flags: Vec<String>,

    /// Extra include directories.
    pub include_dirs: Vec<PathBuf>,

    /// gcov-compatible coverage tool.
    pub coverage_tool: String,

    pub compile_timeout_secs: u64,

    /// Timeout for running an instrumented test binary.
    pub run_timeout_secs: u64,

    pub coverage_timeout_secs: u64,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            cxx: "g++".to_string(),
            cc: "gcc".to_string(),
            cxx_flags: vec!["-std=c++11".to_string()],
            c_flags: Vec::new(),
            link_flags: Vec::new(),
            include_dirs: Vec::new(),
            coverage_tool: "gcov".to_string(),
            compile_timeout_secs: 120,
            run_timeout_secs: 60,
            coverage_timeout_secs: 60,
        }
    }
}

impl ToolchainConfig {
    /// Defaults overlaid with `COVCULL_CXX`, `COVCULL_CC`, `COVCULL_CXXFLAGS`,
    /// `COVCULL_CFLAGS`, `COVCULL_LDFLAGS` and `COVCULL_GCOV`.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup("COVCULL_CXX") {
            self.cxx = v;
        }
        if let Some(v) = lookup("COVCULL_CC") {
            self.cc = v;
        }
        if let Some(v) = lookup("COVCULL_CXXFLAGS") {
            self.cxx_flags = split_flags(&v);
        }
        if let Some(v) = lookup("COVCULL_CFLAGS") {
            self.c_flags = split_flags(&v);
        }
        if let Some(v) = lookup("COVCULL_LDFLAGS") {
            self.link_flags = split_flags(&v);
        }
        if let Some(v) = lookup("COVCULL_GCOV") {
            self.coverage_tool = v;
        }
        self
    }

    /// Adopt compiler and flag assignments from a `Makefile` in `dir`.
    /// Absent file or absent assignments leave the config unchanged.
    pub fn with_build_hints(mut self, dir: &Path) -> Self {
        let path = dir.join(BUILD_DESCRIPTION_FILE);
        let Ok(content) = std::fs::read_to_string(&path) else {
            return self;
        };
        let hints = BuildHints::parse(&content);
        debug!(path = %path.display(), ?hints, "Applying build-description hints");

        if let Some(cxx) = hints.cxx {
            self.cxx = cxx;
        }
        if let Some(cc) = hints.cc {
            self.cc = cc;
        }
        if let Some(flags) = hints.cxx_flags {
            self.cxx_flags = flags;
        }
        if let Some(flags) = hints.c_flags {
            self.c_flags = flags;
        }
        if let Some(flags) = hints.link_flags {
            self.link_flags = flags;
        }
        self
    }

    /// Add the MPI include directory and library, keeping everything else.
    ///
    /// Applied after build hints, so a `Makefile` that sets `LDLIBS` still
    /// links against MPI.
    pub fn with_mpi(mut self) -> Self {
        let include = PathBuf::from(MPI_INCLUDE_DIR);
        if !self.include_dirs.contains(&include) {
            self.include_dirs.push(include);
        }
        if !self.link_flags.iter().any(|f| f == MPI_LIBRARY) {
            self.link_flags.push(MPI_LIBRARY.to_string());
        }
        self
    }

    pub fn compiler_for(&self, lang: Language) -> &str {
        match lang {
            Language::C => &self.cc,
            Language::Cxx => &self.cxx,
        }
    }

    pub fn flags_for(&self, lang: Language) -> &[String] {
        match lang {
            Language::C => &self.c_flags,
            Language::Cxx => &self.cxx_flags,
        }
    }

    /// `-I` arguments for the configured include directories plus `extra`.
    pub fn include_args(&self, extra: &[&Path]) -> Vec<String> {
        extra
            .iter()
            .map(|p| p.to_path_buf())
            .chain(self.include_dirs.iter().cloned())
            .map(|p| format!("-I{}", p.display()))
            .collect()
    }
}

/// Compiler settings found in a build-description file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildHints {
    pub cxx: Option<String>,
    pub cc: Option<String>,
    pub cxx_flags: Option<Vec<String>>,
    pub c_flags: Option<Vec<String>>,
    pub link_flags: Option<Vec<String>>,
}

impl BuildHints {
    /// Parse simple `NAME = value` / `NAME := value` assignments.
    /// Values referencing other make variables are skipped.
    pub fn parse(content: &str) -> Self {
        let re = Regex::new(r"^\s*(CXX|CC|CXXFLAGS|CFLAGS|LDFLAGS|LDLIBS)\s*[:?]?=\s*(.*?)\s*$")
            .expect("static regex");
        let mut hints = BuildHints::default();
        let mut ldflags: Vec<String> = Vec::new();
        let mut saw_link = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("");
            let Some(caps) = re.captures(line) else {
                continue;
            };
            let value = caps[2].to_string();
            if value.contains("$(") || value.contains("${") {
                continue;
            }
            match &caps[1] {
                "CXX" if !value.is_empty() => hints.cxx = Some(value),
                "CC" if !value.is_empty() => hints.cc = Some(value),
                "CXXFLAGS" => hints.cxx_flags = Some(split_flags(&value)),
                "CFLAGS" => hints.c_flags = Some(split_flags(&value)),
                "LDFLAGS" | "LDLIBS" => {
                    saw_link = true;
                    ldflags.extend(split_flags(&value));
                }
                _ => {}
            }
        }
        if saw_link {
            hints.link_flags = Some(ldflags);
        }
        hints
    }
}

fn split_flags(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ToolchainConfig::default();
        assert_eq!(config.cxx, "g++");
        assert_eq!(config.cxx_flags, vec!["-std=c++11"]);
        assert_eq!(config.coverage_tool, "gcov");
        assert!(config.link_flags.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("COVCULL_CXX", "clang++"),
            ("COVCULL_LDFLAGS", "-lmpi -lm"),
        ]
        .into_iter()
        .collect();
        let config =
            ToolchainConfig::default().with_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.cxx, "clang++");
        assert_eq!(config.link_flags, vec!["-lmpi", "-lm"]);
        assert_eq!(config.cc, "gcc");
    }

    #[test]
    fn test_parse_build_hints() {
        let makefile = "\
# HPCG build
CXX = mpicxx
CXXFLAGS := -O2 -std=c++11 -I/usr/include/mpi   # tuned
LDLIBS = -lmpi
CFLAGS = $(CXXFLAGS)
all: xhpcg
";
        let hints = BuildHints::parse(makefile);
        assert_eq!(hints.cxx.as_deref(), Some("mpicxx"));
        assert_eq!(
            hints.cxx_flags,
            Some(vec![
                "-O2".to_string(),
                "-std=c++11".to_string(),
                "-I/usr/include/mpi".to_string()
            ])
        );
        assert_eq!(hints.c_flags, None);
        assert_eq!(hints.link_flags, Some(vec!["-lmpi".to_string()]));
        assert_eq!(hints.cc, None);
    }

    #[test]
    fn test_with_build_hints_missing_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolchainConfig::default().with_build_hints(dir.path());
        assert_eq!(config, ToolchainConfig::default());
    }

    #[test]
    fn test_with_build_hints_reads_makefile() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Makefile"), "CXX=clang++\n").unwrap();
        let config = ToolchainConfig::default().with_build_hints(dir.path());
        assert_eq!(config.cxx, "clang++");
        assert_eq!(config.cxx_flags, vec!["-std=c++11"]);
    }

    #[test]
    fn test_language_and_compiler_selection() {
        let config = ToolchainConfig::default();
        assert_eq!(Language::of(Path::new("a.c")), Language::C);
        assert_eq!(Language::of(Path::new("a.cpp")), Language::Cxx);
        assert_eq!(config.compiler_for(Language::C), "gcc");
        assert_eq!(config.compiler_for(Language::Cxx), "g++");
    }

    #[test]
    fn test_with_mpi_extends_and_is_idempotent() {
        let config = ToolchainConfig {
            link_flags: vec!["-lm".to_string()],
            ..ToolchainConfig::default()
        }
        .with_mpi()
        .with_mpi();
        assert_eq!(config.link_flags, vec!["-lm", "-lmpi"]);
        assert_eq!(config.include_dirs, vec![PathBuf::from("/usr/include/mpi")]);
        assert_eq!(config.cxx, "g++");
    }

    #[test]
    fn test_include_args() {
        let mut config = ToolchainConfig::default();
        config.include_dirs.push(PathBuf::from("/usr/include/mpi"));
        let args = config.include_args(&[Path::new("/work")]);
        assert_eq!(args, vec!["-I/work", "-I/usr/include/mpi"]);
    }
}
