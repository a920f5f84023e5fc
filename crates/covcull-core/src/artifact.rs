//! Source and test artifacts, and the naming rule that pairs them.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::error::{CovcullError, Result};

/// Role an artifact plays in the working directory.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    Source,
    Test,
}

/// A plain-text file in the working directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Artifact {
    /// Absolute or root-relative path on disk.
    pub path: PathBuf,

    /// Whether this is a source or a test.
    pub role: ArtifactRole,
}

impl Artifact {
    pub fn source(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: ArtifactRole::Source,
        }
    }

    pub fn test(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: ArtifactRole::Test,
        }
    }

    /// Human-readable identifier: the path relative to `root` when possible.
    pub fn identifier(&self, root: &Path) -> String {
        self.path
            .strip_prefix(root)
            .unwrap_or(&self.path)
            .display()
            .to_string()
    }

    /// File name component, used in log lines.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the artifact content as text.
    pub fn read_content(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(|e| CovcullError::fs(&self.path, e))
    }

    /// SHA-256 hex digest of the current content.
    pub fn digest(&self) -> Result<String> {
        let bytes = std::fs::read(&self.path).map_err(|e| CovcullError::fs(&self.path, e))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Path of the executable the compile gate writes for this artifact:
    /// the same path with its extension stripped.
    pub fn build_output(&self) -> PathBuf {
        self.path.with_extension("")
    }

    /// Delete the artifact and its build output. Returns whether the
    /// artifact itself was present.
    pub fn remove_with_output(&self) -> Result<bool> {
        let existed = match std::fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(CovcullError::fs(&self.path, e)),
        };

        let output = self.build_output();
        if output != self.path {
            match std::fs::remove_file(&output) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CovcullError::fs(&output, e)),
            }
        }

        Ok(existed)
    }
}

/// `path` resolved against the current directory when relative.
///
/// Compiler invocations run with their own working directory, so every path
/// handed to them must be absolute.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| CovcullError::fs(path, e))
}

/// Fixed naming transformation between a source file and its test.
///
/// `foo_ref.cpp` pairs with `foo_ref_test.cpp`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamingRule {
    /// Suffix appended to the source stem to form the test stem.
    pub test_suffix: String,

    /// Extensions (without dot) of compilable files.
    pub extensions: Vec<String>,
}

impl Default for NamingRule {
    fn default() -> Self {
        Self {
            test_suffix: "_test".to_string(),
            extensions: vec!["c".to_string(), "cpp".to_string()],
        }
    }
}

impl NamingRule {
    /// Whether the path has one of the compilable extensions.
    pub fn is_compilable(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x == e))
            .unwrap_or(false)
    }

    /// Whether the path names a test file under this rule.
    pub fn is_test_file(&self, path: &Path) -> bool {
        self.is_compilable(path)
            && path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(|s| s.ends_with(&self.test_suffix))
                .unwrap_or(false)
    }

    /// Derive the test path for a source path. Returns `None` when the
    /// source is not compilable or is itself a test.
    pub fn test_path_for(&self, source: &Path) -> Option<PathBuf> {
        if !self.is_compilable(source) || self.is_test_file(source) {
            return None;
        }
        let stem = source.file_stem()?.to_str()?;
        let ext = source.extension()?.to_str()?;
        Some(source.with_file_name(format!("{stem}{}.{ext}", self.test_suffix)))
    }

    /// Inverse of [`NamingRule::test_path_for`].
    pub fn source_path_for(&self, test: &Path) -> Option<PathBuf> {
        if !self.is_test_file(test) {
            return None;
        }
        let stem = test.file_stem()?.to_str()?;
        let ext = test.extension()?.to_str()?;
        let source_stem = stem.strip_suffix(&self.test_suffix)?;
        if source_stem.is_empty() {
            return None;
        }
        Some(test.with_file_name(format!("{source_stem}.{ext}")))
    }

    /// Build the pair for a source path.
    pub fn pair(&self, source: &Path) -> Option<CandidatePair> {
        let test = self.test_path_for(source)?;
        Some(CandidatePair {
            source: Artifact::source(source),
            test: Artifact::test(test),
        })
    }
}

/// One source file and the single test file that targets it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CandidatePair {
    pub source: Artifact,
    pub test: Artifact,
}

impl CandidatePair {
    /// Whether a test file already exists for this source.
    pub fn has_test(&self) -> bool {
        self.test.exists()
    }
}
