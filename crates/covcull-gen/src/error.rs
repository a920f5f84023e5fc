//! Error types for covcull-gen

use covcull_core::CovcullError;
use thiserror::Error;

/// Errors that can occur while requesting generated tests
#[derive(Error, Debug)]
pub enum GeneratorError {
    /// No API key was configured
    #[error("no API key configured (set OPENAI_API_KEY)")]
    MissingApiKey,

    /// Transport-level failure
    #[error("HTTP error: {0}")]
    Http(String),

    /// The API answered with a non-success status
    #[error("API returned status {status}: {body}")]
    ApiStatus { status: u16, body: String },

    /// The reply carried no usable text
    #[error("API reply contained no test text")]
    EmptyResponse,

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for GeneratorError {
    fn from(err: reqwest::Error) -> Self {
        GeneratorError::Http(err.to_string())
    }
}

impl GeneratorError {
    /// Attach the source the request was for, as the core error kind.
    pub fn into_covcull(self, source_path: impl Into<String>) -> CovcullError {
        CovcullError::GeneratorFailure {
            source_path: source_path.into(),
            reason: self.to_string(),
        }
    }
}
