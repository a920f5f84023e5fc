//! Generator collaborator: produces test text for a source file.
//!
//! Output is untrusted. Everything a generator writes goes through the
//! compile gate before it can reach coverage measurement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{CovcullError, Result};

/// Marker line written before each appended block.
pub const GENERATED_HEADER: &str = "// Auto-generated tests";

/// Input for one generation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationRequest {
    pub source_path: PathBuf,
    pub source_content: String,

    /// Current test content; empty when no test exists yet.
    pub existing_test_content: String,
}

/// Produces test text to append to a test file.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate test text. Any failure is reported as `GeneratorFailure`.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Append generated text to `test_path`, creating the file when absent.
pub fn append_generated(test_path: &Path, generated: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(test_path)
        .map_err(|e| CovcullError::fs(test_path, e))?;

    let mut block = format!("\n{GENERATED_HEADER}\n{generated}");
    if !block.ends_with('\n') {
        block.push('\n');
    }
    file.write_all(block.as_bytes())
        .map_err(|e| CovcullError::fs(test_path, e))
}
