//! In-memory fakes for the collaborator traits (testing only)
//!
//! Provides `ScriptedCompileGate`, `AnnotationOracle` and `CannedGenerator`
//! that satisfy the trait contracts without a compiler, gcov or network.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::artifact::Artifact;
use crate::compile_gate::{CompileGate, CompileOutcome};
use crate::discovery::{discover, DiscoveryRule};
use crate::error::{CovcullError, Result};
use crate::generator::{GenerationRequest, Generator};
use crate::measurement::CoverageMeasurement;
use crate::oracle::CoverageOracle;

// ---------------------------------------------------------------------------
// ScriptedCompileGate
// ---------------------------------------------------------------------------

/// Compile gate that fails any test containing an `#error` directive and
/// otherwise writes a placeholder executable next to the test.
#[derive(Debug, Default)]
pub struct ScriptedCompileGate {
    compiled: Mutex<Vec<String>>,
}

impl ScriptedCompileGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// File names passed to `compile`, in call order.
    pub fn compiled(&self) -> Vec<String> {
        self.compiled.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl CompileGate for ScriptedCompileGate {
    async fn compile(&self, test: &Artifact, _context_dir: &Path) -> CompileOutcome {
        self.compiled.lock().unwrap_or_else(|e| e.into_inner()).push(test.file_name());

        let content = match test.read_content() {
            Ok(c) => c,
            Err(e) => return CompileOutcome::failed(e.to_string()),
        };
        if let Some(line) = content.lines().find(|l| l.trim_start().starts_with("#error")) {
            return CompileOutcome::failed(format!("{}: error: {}", test.file_name(), line.trim()));
        }

        let output = test.build_output();
        match std::fs::write(&output, b"fake-binary") {
            Ok(()) => CompileOutcome::passed(output, String::new()),
            Err(e) => CompileOutcome::failed(e.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// AnnotationOracle
// ---------------------------------------------------------------------------

/// Oracle that derives coverage from annotations instead of running code.
///
/// Every non-blank line of a source counts as executable. A test covers the
/// source lines listed in its `// covers: 1-4,7` lines. A test containing
/// `// oracle: crash` makes its unit fail (zero contribution).
#[derive(Debug, Default)]
pub struct AnnotationOracle {
    rule: DiscoveryRule,
    calls: AtomicUsize,
}

impl AnnotationOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `measure` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn measure_unit(source: &Artifact, test: &Artifact) -> Result<CoverageMeasurement> {
        let total = source
            .read_content()?
            .lines()
            .filter(|l| !l.trim().is_empty())
            .count() as u64;

        if !test.exists() {
            return CoverageMeasurement::new(0, total);
        }
        let content = test.read_content()?;
        if content.contains("// oracle: crash") {
            return Err(CovcullError::OracleFailure {
                artifact: test.file_name(),
                reason: "instrumented run crashed".to_string(),
            });
        }

        let covered: BTreeSet<u64> = content
            .lines()
            .filter_map(|l| l.trim().strip_prefix("// covers:"))
            .flat_map(parse_line_ranges)
            .filter(|n| (1..=total).contains(n))
            .collect();
        CoverageMeasurement::new(covered.len() as u64, total)
    }
}

fn parse_line_ranges(spec: &str) -> Vec<u64> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .flat_map(|part| match part.split_once('-') {
            Some((a, b)) => match (a.trim().parse::<u64>(), b.trim().parse::<u64>()) {
                (Ok(a), Ok(b)) if a <= b => (a..=b).collect(),
                _ => Vec::new(),
            },
            None => part.parse::<u64>().map(|n| vec![n]).unwrap_or_default(),
        })
        .collect()
}

#[async_trait]
impl CoverageOracle for AnnotationOracle {
    async fn measure(&self, directory: &Path) -> Result<CoverageMeasurement> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut total = CoverageMeasurement::empty();
        for pair in discover(directory, &self.rule)? {
            if let Ok(m) = Self::measure_unit(&pair.source, &pair.test) {
                total = total.merge(&m);
            }
        }
        Ok(total)
    }
}

// ---------------------------------------------------------------------------
// CannedGenerator
// ---------------------------------------------------------------------------

/// Generator returning canned text per source file name.
#[derive(Debug, Default)]
pub struct CannedGenerator {
    default: Option<String>,
    responses: HashMap<String, String>,
    failing: BTreeSet<String>,
    calls: AtomicUsize,
}

impl CannedGenerator {
    /// A generator that answers `default` for every source without a
    /// specific response (and fails when `default` is `None`).
    pub fn new(default: Option<&str>) -> Self {
        Self {
            default: default.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_response(mut self, source_file: &str, text: &str) -> Self {
        self.responses
            .insert(source_file.to_string(), text.to_string());
        self
    }

    pub fn failing_for(mut self, source_file: &str) -> Self {
        self.failing.insert(source_file.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for CannedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let name = request
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self.failing.contains(&name) {
            return Err(CovcullError::GeneratorFailure {
                source_path: name,
                reason: "canned failure".to_string(),
            });
        }
        self.responses
            .get(&name)
            .or(self.default.as_ref())
            .cloned()
            .ok_or(CovcullError::GeneratorFailure {
                source_path: name,
                reason: "no canned response".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_ranges() {
        assert_eq!(parse_line_ranges(" 1-3, 7 ,x, 9-8"), vec![1, 2, 3, 7]);
        assert!(parse_line_ranges("").is_empty());
    }

    #[tokio::test]
    async fn test_annotation_oracle_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a_ref.c"), "l1\nl2\n\nl3\nl4\n").unwrap();
        std::fs::write(dir.path().join("a_ref_test.c"), "// covers: 1-2\n// covers: 2, 9\n")
            .unwrap();

        let oracle = AnnotationOracle::new();
        let m = oracle.measure(dir.path()).await.unwrap();
        assert_eq!(m, CoverageMeasurement::new(2, 4).unwrap());
        assert_eq!(oracle.calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_gate() {
        let dir = tempfile::tempdir().unwrap();
        let good = Artifact::test(dir.path().join("a_ref_test.c"));
        let bad = Artifact::test(dir.path().join("b_ref_test.c"));
        std::fs::write(&good.path, "int main(void){return 0;}\n").unwrap();
        std::fs::write(&bad.path, "#error nope\n").unwrap();

        let gate = ScriptedCompileGate::new();
        assert!(gate.compile(&good, dir.path()).await.success);
        assert!(good.build_output().exists());
        let outcome = gate.compile(&bad, dir.path()).await;
        assert!(!outcome.success);
        assert!(outcome.diagnostics.contains("#error nope"));
        assert_eq!(gate.compiled(), vec!["a_ref_test.c", "b_ref_test.c"]);
    }

    #[tokio::test]
    async fn test_canned_generator() {
        let generator = CannedGenerator::new(None)
            .with_response("a_ref.c", "// covers: 1")
            .failing_for("b_ref.c");
        let request = |name: &str| GenerationRequest {
            source_path: name.into(),
            source_content: String::new(),
            existing_test_content: String::new(),
        };
        assert_eq!(
            generator.generate(&request("a_ref.c")).await.unwrap(),
            "// covers: 1"
        );
        assert!(generator.generate(&request("b_ref.c")).await.is_err());
        assert!(generator.generate(&request("c_ref.c")).await.is_err());
        assert_eq!(generator.calls(), 3);
    }
}
