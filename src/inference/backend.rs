//! Backend Selection
//!
//! Provider selection between Anthropic and OpenAI, driven by the
//! `AGENT_BACKEND` environment variable, plus the client factory.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::anthropic_client::AnthropicClient;
use super::llm_client::LlmClient;
use super::openai_client::OpenAiClient;

/// LLM backend provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentBackend {
    /// Anthropic Claude (default)
    #[default]
    Anthropic,
    /// OpenAI GPT
    OpenAi,
}

impl AgentBackend {
    /// Create from the `AGENT_BACKEND` environment variable.
    /// Valid values: "anthropic", "claude", "openai", "gpt".
    pub fn from_env() -> Result<Self> {
        let value = std::env::var("AGENT_BACKEND").unwrap_or_else(|_| "anthropic".to_string());
        value.parse()
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentBackend::Anthropic => "Anthropic",
            AgentBackend::OpenAi => "OpenAI",
        }
    }
}

impl FromStr for AgentBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(AgentBackend::Anthropic),
            "openai" | "gpt" => Ok(AgentBackend::OpenAi),
            other => Err(anyhow!(
                "Unknown AGENT_BACKEND '{other}'. Valid values: anthropic, claude, openai, gpt"
            )),
        }
    }
}

impl std::fmt::Display for AgentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Create an LLM client for the given backend with an explicit API key.
pub fn create_llm_client(backend: AgentBackend, api_key: String) -> Arc<dyn LlmClient> {
    match backend {
        AgentBackend::Anthropic => Arc::new(AnthropicClient::new(api_key)),
        AgentBackend::OpenAi => Arc::new(OpenAiClient::new(api_key)),
    }
}

/// Create an LLM client from environment variables
/// (`AGENT_BACKEND` + the provider's API key variable).
pub fn create_llm_client_from_env() -> Result<Arc<dyn LlmClient>> {
    let backend = AgentBackend::from_env()?;
    let client: Arc<dyn LlmClient> = match backend {
        AgentBackend::Anthropic => Arc::new(AnthropicClient::from_env()?),
        AgentBackend::OpenAi => Arc::new(OpenAiClient::from_env()?),
    };
    Ok(client)
}
