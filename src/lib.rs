//! Quality-gated timesheet answering agent
//!
//! Answers user questions about timesheet data over messaging channels,
//! and never delivers an unvalidated answer. Every accepted request runs
//! through a stateful pipeline with one bounded self-correction retry and
//! a guaranteed-success apology fallback.
//!
//! ## Architecture
//!
//! ```text
//! inbound message
//!     → planning        (plan + scorecard)
//!     → retrieval       (only when the plan needs data)
//!     → composition     (channel-agnostic draft)
//!     → formatting      (channel policy: markup, style, splitting)
//!     → validation      (judge each scorecard criterion, fail-closed)
//!     → [refinement → formatting → validation]   at most once
//!     → [failure composer]                        when still failing
//!     → final response + audit trail
//! ```
//!
//! Reasoning is delegated to the [`inference::LanguageInference`] port
//! (Anthropic or OpenAI behind [`inference::LlmClient`]); timesheet data
//! comes from the [`retrieval::DataRetrieval`] port. Both are trait
//! objects, so tests drive the full pipeline with scripted doubles.

pub mod audit;
pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod inference;
pub mod model;
pub mod retrieval;

#[cfg(feature = "server")]
pub mod api;

// Re-exports for convenience
pub use audit::{AuditSink, FailureRecord, InteractionRecord, MemoryAuditSink, TracingAuditSink};
pub use channel::{Channel, ChannelPolicy, ChannelPolicyTable, MarkupKind, SplitStrategy};
pub use config::{EngineConfig, StyleConfig, TimeoutConfig, Tone};
pub use engine::{
    Engine, EngineBuilder, EngineReply, InboundMessage, WorkflowState, WorkflowStatus,
};
pub use error::{EngineError, EngineResult};
pub use history::{ConversationTurn, HistoryStore, InMemoryHistoryStore, TurnRole};
pub use inference::{create_llm_client_from_env, AgentBackend, LanguageInference, LlmInference};
pub use model::{
    Criterion, DraftResponse, ExecutionPlan, FormattedPayload, MessagePart, ResponseKind,
    Scorecard, ValidationResult,
};
pub use retrieval::{
    Credentials, DataBundle, DataRetrieval, DataUnavailable, HttpTimesheetClient, TimesheetQuery,
};
