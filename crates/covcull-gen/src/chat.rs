//! Chat-completions test generator
//!
//! One request per source file, no retries. The reply's fenced code blocks
//! become the test text.

use async_trait::async_trait;
use covcull_core::{GenerationRequest, Generator};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::GeneratorConfig;
use crate::error::GeneratorError;
use crate::Result;

const SYSTEM_PROMPT: &str =
    "You write C and C++ unit tests that compile and run without modification.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Generator backed by an OpenAI-compatible chat-completions endpoint
pub struct ChatGenerator {
    config: GeneratorConfig,
    api_key: String,
    http_client: reqwest::Client,
}

impl ChatGenerator {
    /// Create a generator; fails when no API key is configured
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or(GeneratorError::MissingApiKey)?;
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("covcull/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(ChatGenerator {
            config,
            api_key,
            http_client,
        })
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Send one completion request and return the extracted test text
    pub async fn request_tests(&self, request: &GenerationRequest) -> Result<String> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Some(SYSTEM_PROMPT.to_string()),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Some(build_prompt(request, self.config.mpi)),
                },
            ],
            temperature: self.config.temperature,
        };

        info!(
            source = %request.source_path.display(),
            model = %self.config.model,
            "Requesting generated tests"
        );
        let response = self
            .http_client
            .post(self.config.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(GeneratorError::ApiStatus {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&text)?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(GeneratorError::EmptyResponse)?;

        let code = extract_code_blocks(&content);
        if code.trim().is_empty() {
            return Err(GeneratorError::EmptyResponse);
        }
        debug!(bytes = code.len(), "Received generated tests");
        Ok(code)
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    async fn generate(&self, request: &GenerationRequest) -> covcull_core::Result<String> {
        self.request_tests(request)
            .await
            .map_err(|e| e.into_covcull(request.source_path.display().to_string()))
    }
}

/// Extra rule for sources that only build against MPI.
const MPI_RULE: &str = "- The tests run as an MPI program: include <mpi.h>, call MPI_Init at the \
                        start of main and MPI_Finalize before it returns.\n";

/// User prompt for one source file and its current test.
pub fn build_prompt(request: &GenerationRequest, mpi: bool) -> String {
    let existing = if request.existing_test_content.trim().is_empty() {
        "(none yet: include a main function that runs every test and returns 0 on success)"
            .to_string()
    } else {
        format!(
            "```\n{}\n```\nThe new code is appended to this file, so do not redefine \
             main or anything else it already defines.",
            request.existing_test_content.trim_end()
        )
    };

    format!(
        "Write additional unit tests for the source file `{name}` that increase its line \
         coverage.\n\
         \n\
         Rules:\n\
         - Confirm every function signature from the source before calling it.\n\
         - Use only the files shown here and the standard library.\n\
         - Any explanation must be inside code comments so the file still compiles.\n\
         - Reply with a single fenced code block.\n\
         {mpi_rule}\
         \n\
         # Source file\n\
         ```\n{source}\n```\n\
         \n\
         # Existing test file\n\
         {existing}\n",
        name = request
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        source = request.source_content.trim_end(),
        mpi_rule = if mpi { MPI_RULE } else { "" },
    )
}

/// Contents of the fenced code blocks in `reply`, joined by blank lines.
///
/// A reply without fences is returned trimmed; an unterminated final fence
/// runs to the end of the reply.
pub fn extract_code_blocks(reply: &str) -> String {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in reply.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(block) => blocks.push(block.join("\n")),
                None => current = Some(Vec::new()),
            }
            continue;
        }
        if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }
    if let Some(block) = current {
        blocks.push(block.join("\n"));
    }

    if blocks.is_empty() {
        reply.trim().to_string()
    } else {
        blocks.join("\n\n")
    }
}
