//! covcull-gen: test generation over a chat-completions API
//!
//! Implements the core `Generator` trait. Output is untrusted and always
//! passes through the compile gate before it is measured.

pub mod chat;
pub mod config;
pub mod error;

pub use chat::{build_prompt, extract_code_blocks, ChatGenerator};
pub use config::{GeneratorConfig, DEFAULT_API_BASE, DEFAULT_MODEL};
pub use error::GeneratorError;

/// Result type for generator operations
pub type Result<T> = std::result::Result<T, GeneratorError>;
