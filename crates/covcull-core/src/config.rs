//! Run configuration, fixed at run start.

use serde::{Deserialize, Serialize};

use crate::discovery::DiscoveryRule;
use crate::error::{CovcullError, Result};
use crate::retention::{RetentionPolicy, DEFAULT_THRESHOLD_PCT};
use crate::toolchain::ToolchainConfig;

/// Everything one run needs besides its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Minimum contribution (percentage points) for a test to be kept.
    pub threshold_pct: f64,

    /// Maximum concurrent leave-one-out estimates.
    pub jobs: usize,

    /// Restrict the run to the pair whose source or test has this file name.
    pub single_file: Option<String>,

    pub discovery: DiscoveryRule,

    pub toolchain: ToolchainConfig,

    /// Lines of diagnostics kept in user-visible failure notes.
    pub excerpt_lines: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threshold_pct: DEFAULT_THRESHOLD_PCT,
            jobs: 1,
            single_file: None,
            discovery: DiscoveryRule::default(),
            toolchain: ToolchainConfig::default(),
            excerpt_lines: 12,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.jobs == 0 {
            return Err(CovcullError::InvalidConfig(
                "jobs must be at least 1".to_string(),
            ));
        }
        if self.discovery.naming.extensions.is_empty() {
            return Err(CovcullError::InvalidConfig(
                "at least one source extension is required".to_string(),
            ));
        }
        if self.discovery.naming.test_suffix.is_empty() {
            return Err(CovcullError::InvalidConfig(
                "test suffix must not be empty".to_string(),
            ));
        }
        self.retention_policy().map(|_| ())
    }

    pub fn retention_policy(&self) -> Result<RetentionPolicy> {
        RetentionPolicy::new(self.threshold_pct)
    }
}
