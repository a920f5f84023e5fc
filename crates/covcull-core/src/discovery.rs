//! Candidate source discovery.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::artifact::{CandidatePair, NamingRule};
use crate::error::{CovcullError, Result};

/// Filename rule selecting candidate sources: a substring plus a
/// compilable extension, excluding files that are themselves tests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryRule {
    /// Substring a source file name must contain.
    pub substring: String,

    pub naming: NamingRule,
}

impl Default for DiscoveryRule {
    fn default() -> Self {
        Self {
            substring: "_ref".to_string(),
            naming: NamingRule::default(),
        }
    }
}

impl DiscoveryRule {
    /// Whether `path` is a candidate source under this rule.
    pub fn matches(&self, path: &Path) -> bool {
        let name_ok = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.contains(&self.substring))
            .unwrap_or(false);
        name_ok && self.naming.is_compilable(path) && !self.naming.is_test_file(path)
    }
}

/// Find every candidate source under `root` and pair it with its test path.
///
/// Hidden directories are skipped. The result is sorted by source path.
pub fn discover(root: &Path, rule: &DiscoveryRule) -> Result<Vec<CandidatePair>> {
    let mut pairs: Vec<CandidatePair> = walk_files(root)?
        .into_iter()
        .filter(|p| rule.matches(p))
        .filter_map(|p| rule.naming.pair(&p))
        .collect();
    pairs.sort_by(|a, b| a.source.path.cmp(&b.source.path));
    Ok(pairs)
}

/// Keep only the pair whose source or test file name equals `name`.
pub fn filter_single(pairs: Vec<CandidatePair>, name: &str) -> Result<Vec<CandidatePair>> {
    let matches_name = |p: &Path| {
        p.file_name()
            .and_then(|n| n.to_str())
            .map(|n| n == name)
            .unwrap_or(false)
            || p.ends_with(name)
    };
    let kept: Vec<CandidatePair> = pairs
        .into_iter()
        .filter(|pair| matches_name(&pair.source.path) || matches_name(&pair.test.path))
        .collect();
    if kept.is_empty() {
        return Err(CovcullError::InvalidConfig(format!(
            "no candidate source matches {name}"
        )));
    }
    Ok(kept)
}

/// Simple recursive file walker
fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if !dir.is_dir() {
        return Ok(files);
    }

    let entries = std::fs::read_dir(dir).map_err(|e| CovcullError::fs(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| CovcullError::fs(dir, e))?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false);

        let file_type = entry.file_type().map_err(|e| CovcullError::fs(&path, e))?;
        if file_type.is_dir() {
            if !hidden {
                files.extend(walk_files(&path)?);
            }
        } else if file_type.is_file() {
            files.push(path);
        }
    }

    Ok(files)
}
