//! LLM-backed Language Inference
//!
//! Implements the five pipeline operations on top of any [`LlmClient`] via
//! prompt templates and JSON parsing. Parse failures surface as
//! `InferenceError`; shape repair is the planning stage's job, not ours.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use crate::channel::Channel;
use crate::error::{EngineError, EngineResult};
use crate::history::{ConversationTurn, TurnRole};
use crate::model::{Criterion, DraftResponse, ResponseKind};

use super::llm_client::LlmClient;
use super::port::{
    CompositionContext, CriterionVerdict, InferredPlan, LanguageInference, PlanningContext,
    RefinementContext,
};

const PLAN_SYSTEM: &str = "You are the planning component of a timesheet assistant. \
Given a user message, decide the steps needed to answer it and the acceptance \
criteria the final answer must satisfy. Respond as JSON: \
{\"steps\": [{\"stage\": \"retrieval|composition|formatting|validation\", \
\"action\": string, \"parameters\": object}], \"needs_data\": bool, \
\"context\": object of strings, \"criteria\": [{\"id\": string, \
\"description\": string, \"expected\": string}]}. \
When timesheet data is needed, include a retrieval step whose parameters hold \
{\"operation\": \"hours_summary\"|\"recent_entries\"|\"missing_days\", ...}. \
Criteria must be concrete, independently checkable statements about the answer.";

const COMPOSE_SYSTEM: &str = "You are the drafting component of a timesheet assistant. \
Write a concise, channel-agnostic answer to the user's question. If data is \
provided, use the exact numbers. If data is marked unavailable, apologize and \
say what you could not fetch; never invent figures. Respond as JSON: \
{\"text\": string, \"used_data\": bool, \
\"kind\": \"data_answer\"|\"conversational\"|\"apology\", \"confidence\": number}.";

const REFINE_SYSTEM: &str = "You are revising a draft answer that failed review. \
Address every piece of feedback while keeping the answer truthful and concise. \
Respond as JSON: {\"text\": string, \"used_data\": bool, \
\"kind\": \"data_answer\"|\"conversational\"|\"apology\", \"confidence\": number}.";

const JUDGE_SYSTEM: &str = "You are a strict reviewer. Decide whether the given \
response satisfies one acceptance criterion. Respond as JSON: \
{\"passed\": bool, \"feedback\": string or null}. Feedback is required when \
passed is false and must say what to change.";

const FAILURE_SYSTEM: &str = "You write short, polite apology messages for a \
timesheet assistant that could not produce a verified answer. Do not mention \
internal checks, criteria or errors. Offer to try again. Plain text only.";

/// Prompt-template implementation of the inference port
pub struct LlmInference {
    client: Arc<dyn LlmClient>,
}

impl LlmInference {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    pub fn provider_name(&self) -> &str {
        self.client.provider_name()
    }

    async fn chat_json(&self, operation: &'static str, system: &str, user: &str) -> EngineResult<String> {
        debug!(operation, provider = self.client.provider_name(), "inference call");
        self.client
            .chat_json(system, user)
            .await
            .map_err(|e| EngineError::InferenceError {
                operation,
                message: e.to_string(),
            })
    }

    fn parse<T: for<'de> Deserialize<'de>>(operation: &'static str, raw: &str) -> EngineResult<T> {
        let cleaned = strip_code_fences(raw);
        serde_json::from_str(cleaned).map_err(|e| EngineError::InferenceError {
            operation,
            message: format!("unparseable response: {e}"),
        })
    }
}

/// LLMs sometimes wrap JSON in markdown fences despite instructions.
fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn render_history(history: &[ConversationTurn]) -> String {
    if history.is_empty() {
        return "(none)".to_string();
    }
    history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            };
            format!("{role}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct DraftDto {
    text: String,
    #[serde(default)]
    used_data: bool,
    #[serde(default)]
    kind: Option<ResponseKind>,
    #[serde(default)]
    confidence: Option<f32>,
}

impl DraftDto {
    fn into_draft(self, fallback_kind: ResponseKind) -> DraftResponse {
        DraftResponse::new(
            self.text,
            self.used_data,
            self.kind.unwrap_or(fallback_kind),
            self.confidence.unwrap_or(0.5),
        )
    }
}

#[async_trait]
impl LanguageInference for LlmInference {
    async fn plan(&self, ctx: &PlanningContext) -> EngineResult<InferredPlan> {
        let user = format!(
            "Channel: {}\nConversation so far:\n{}\nUser context: {}\n\nUser message: {}",
            ctx.channel,
            render_history(&ctx.history),
            serde_json::to_string(&ctx.user_context)?,
            ctx.message
        );
        let raw = self.chat_json("plan", PLAN_SYSTEM, &user).await?;
        Self::parse("plan", &raw)
    }

    async fn compose(&self, ctx: &CompositionContext) -> EngineResult<DraftResponse> {
        let data_section = match (&ctx.data_summary, &ctx.unavailable_note) {
            (Some(summary), _) => format!("Timesheet data: {summary}"),
            (None, Some(note)) => format!("Timesheet data UNAVAILABLE: {note}"),
            (None, None) => "No timesheet data was needed.".to_string(),
        };
        let user = format!(
            "Tone: {}\nConversation so far:\n{}\n{}\n\nQuestion: {}",
            ctx.tone.as_str(),
            render_history(&ctx.history),
            data_section,
            ctx.question
        );
        let raw = self.chat_json("compose", COMPOSE_SYSTEM, &user).await?;
        let fallback_kind = if ctx.unavailable_note.is_some() {
            ResponseKind::Apology
        } else {
            ResponseKind::Conversational
        };
        Ok(Self::parse::<DraftDto>("compose", &raw)?.into_draft(fallback_kind))
    }

    async fn refine(&self, ctx: &RefinementContext) -> EngineResult<DraftResponse> {
        let feedback: Vec<String> = ctx
            .failed_criteria
            .iter()
            .map(|c| format!("- {} ({}): {}", c.id, c.description, c.feedback))
            .collect();
        let user = format!(
            "Tone: {}\nOriginal question: {}\n\nPrevious draft:\n{}\n\nReview feedback to address:\n{}",
            ctx.tone.as_str(),
            ctx.question,
            ctx.prior_draft.text,
            feedback.join("\n")
        );
        let raw = self.chat_json("refine", REFINE_SYSTEM, &user).await?;
        Ok(Self::parse::<DraftDto>("refine", &raw)?.into_draft(ctx.prior_draft.kind))
    }

    async fn judge(
        &self,
        criterion: &Criterion,
        content: &str,
        question: &str,
    ) -> EngineResult<CriterionVerdict> {
        let user = format!(
            "Criterion: {}\nPass condition: {}\n\nOriginal question: {}\n\nResponse under review:\n{}",
            criterion.description, criterion.expected, question, content
        );
        let raw = self.chat_json("judge", JUDGE_SYSTEM, &user).await?;
        Self::parse("judge", &raw)
    }

    async fn compose_failure(
        &self,
        question: &str,
        reason: &str,
        channel: Channel,
    ) -> EngineResult<String> {
        let user = format!(
            "Channel: {channel}\nFailure classification: {reason}\nThe user asked: {question}\n\nWrite the apology message."
        );
        let message = self
            .client
            .chat(FAILURE_SYSTEM, &user)
            .await
            .map_err(|e| EngineError::InferenceError {
                operation: "compose_failure",
                message: e.to_string(),
            })?;
        Ok(message.trim().to_string())
    }
}
