//! Generator configuration

use serde::{Deserialize, Serialize};

/// Default chat-completions endpoint base.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default model name.
pub const DEFAULT_MODEL: &str = "gpt-4-turbo";

/// Generator configuration, scoped to one run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratorConfig {
    /// Bearer credential for the API
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Base URL; requests go to `{base_url}/chat/completions`
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Ask for tests that run as MPI programs
    #[serde(default)]
    pub mpi: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            api_key: None,
            base_url: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            timeout_secs: 120,
            mpi: false,
        }
    }
}

impl GeneratorConfig {
    /// Read `OPENAI_API_KEY`, `COVCULL_API_BASE` and `COVCULL_MODEL`.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        self.api_key = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty());
        if let Some(base) = lookup("COVCULL_API_BASE") {
            self.base_url = base;
        }
        if let Some(model) = lookup("COVCULL_MODEL") {
            self.model = model;
        }
        self
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn with_mpi(mut self, mpi: bool) -> Self {
        self.mpi = mpi;
        self
    }

    /// Full endpoint URL.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}
