//! Language inference
//!
//! The reasoning capability behind the pipeline: a low-level [`LlmClient`]
//! abstraction over providers, and the [`LanguageInference`] port exposing
//! the five operations the stages consume (plan, compose, refine, judge,
//! compose-failure).
//!
//! Backend selection follows the `AGENT_BACKEND` environment variable:
//! - `anthropic` (default): Anthropic Claude API
//! - `openai`: OpenAI API

pub mod anthropic_client;
pub mod backend;
pub mod llm_client;
pub mod llm_inference;
pub mod openai_client;
pub mod port;

pub use anthropic_client::AnthropicClient;
pub use backend::{create_llm_client, create_llm_client_from_env, AgentBackend};
pub use llm_client::LlmClient;
pub use llm_inference::LlmInference;
pub use openai_client::OpenAiClient;
pub use port::{
    CompositionContext, CriterionVerdict, FailedCriterion, InferredCriterion, InferredPlan,
    InferredStep, LanguageInference, PlanningContext, RefinementContext,
};
