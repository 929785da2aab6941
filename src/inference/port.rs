//! Language Inference Port
//!
//! The five reasoning operations the pipeline delegates: plan, compose,
//! refine, judge, compose-failure. Implementations return loosely-shaped
//! results; the stages own the shape invariants and repair or reject
//! non-conforming output.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::Channel;
use crate::config::Tone;
use crate::error::EngineResult;
use crate::history::ConversationTurn;
use crate::model::{Criterion, DraftResponse};

/// Inputs for the planning operation
#[derive(Debug, Clone)]
pub struct PlanningContext {
    pub request_id: Uuid,
    pub message: String,
    pub channel: Channel,
    pub history: Vec<ConversationTurn>,
    pub user_context: HashMap<String, String>,
}

/// Raw plan step as inferred; stage names are free-form strings here
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredStep {
    pub stage: String,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Raw acceptance criterion as inferred
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredCriterion {
    #[serde(default)]
    pub id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub expected: String,
}

/// Unvalidated planning output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferredPlan {
    #[serde(default)]
    pub steps: Vec<InferredStep>,
    #[serde(default)]
    pub needs_data: bool,
    #[serde(default)]
    pub context: HashMap<String, String>,
    #[serde(default)]
    pub criteria: Vec<InferredCriterion>,
}

/// Inputs for the composition operation
#[derive(Debug, Clone)]
pub struct CompositionContext {
    pub request_id: Uuid,
    pub question: String,
    /// Plain-text rendering of retrieved data, when any
    pub data_summary: Option<String>,
    /// Why data is missing, when retrieval failed
    pub unavailable_note: Option<String>,
    pub history: Vec<ConversationTurn>,
    pub user_context: HashMap<String, String>,
    pub tone: Tone,
}

/// A failed criterion handed back to the refinement call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCriterion {
    pub id: String,
    pub description: String,
    pub feedback: String,
}

/// Inputs for the refinement operation
#[derive(Debug, Clone)]
pub struct RefinementContext {
    pub request_id: Uuid,
    pub question: String,
    pub prior_draft: DraftResponse,
    /// Every piece of feedback must be incorporated
    pub failed_criteria: Vec<FailedCriterion>,
    pub tone: Tone,
}

/// Verdict on a single criterion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionVerdict {
    pub passed: bool,
    #[serde(default)]
    pub feedback: Option<String>,
}

/// The reasoning capability consumed by the pipeline stages
#[async_trait]
pub trait LanguageInference: Send + Sync {
    /// Turn a request into an unvalidated plan plus scorecard criteria.
    async fn plan(&self, ctx: &PlanningContext) -> EngineResult<InferredPlan>;

    /// Compose a channel-agnostic draft answer.
    async fn compose(&self, ctx: &CompositionContext) -> EngineResult<DraftResponse>;

    /// Revise a draft using the failed-criteria feedback.
    async fn refine(&self, ctx: &RefinementContext) -> EngineResult<DraftResponse>;

    /// Judge one criterion against the formatted content.
    async fn judge(
        &self,
        criterion: &Criterion,
        content: &str,
        question: &str,
    ) -> EngineResult<CriterionVerdict>;

    /// Compose a user-safe failure message.
    async fn compose_failure(
        &self,
        question: &str,
        reason: &str,
        channel: Channel,
    ) -> EngineResult<String>;
}
