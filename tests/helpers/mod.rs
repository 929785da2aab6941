//! Scripted port doubles for driving the full pipeline in tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ts_concierge::error::{EngineError, EngineResult};
use ts_concierge::inference::{
    CompositionContext, CriterionVerdict, InferredCriterion, InferredPlan, InferredStep,
    LanguageInference, PlanningContext, RefinementContext,
};
use ts_concierge::model::{Criterion, DraftResponse, ResponseKind};
use ts_concierge::retrieval::{
    Credentials, DataBundle, DataRetrieval, DataUnavailable, TimesheetQuery,
};
use ts_concierge::Channel;

/// What the scripted composer produces on the initial pass
#[derive(Debug, Clone)]
pub enum ComposeBehavior {
    /// Echo the data summary, or apologize when data is unavailable
    EchoData,
    /// Wrap the data summary in markup tags the formatter does not strip
    WithMarkup,
    /// Emit `n` numbered sentences (for splitting tests)
    LongText(usize),
}

/// Deterministic inference double.
///
/// Judging convention: a criterion passes when the content contains its
/// `expected` text; an `expected` of the form `not:X` passes when the
/// content does NOT contain `X`. Refinement strips markup tags, which is
/// how "feedback gets incorporated" here.
pub struct ScriptedInference {
    pub needs_data: bool,
    /// (id, description, expected) triples handed back from planning
    pub criteria: Vec<(&'static str, &'static str, &'static str)>,
    pub compose: ComposeBehavior,
    /// Artificial latency injected into the plan operation
    pub plan_delay: Option<Duration>,
}

impl Default for ScriptedInference {
    fn default() -> Self {
        Self {
            needs_data: true,
            criteria: vec![(
                "c1",
                "mentions the hours logged",
                "32",
            )],
            compose: ComposeBehavior::EchoData,
            plan_delay: None,
        }
    }
}

fn judge_by_convention(expected: &str, content: &str) -> (bool, Option<String>) {
    if let Some(forbidden) = expected.strip_prefix("not:") {
        let passed = !content.contains(forbidden);
        let feedback = (!passed).then(|| format!("remove every occurrence of '{forbidden}'"));
        (passed, feedback)
    } else {
        let passed = content.contains(expected);
        let feedback = (!passed).then(|| format!("the answer must contain '{expected}'"));
        (passed, feedback)
    }
}

#[async_trait]
impl LanguageInference for ScriptedInference {
    async fn plan(&self, _ctx: &PlanningContext) -> EngineResult<InferredPlan> {
        if let Some(delay) = self.plan_delay {
            tokio::time::sleep(delay).await;
        }
        let mut steps = Vec::new();
        if self.needs_data {
            steps.push(InferredStep {
                stage: "retrieval".into(),
                action: "fetch_hours".into(),
                parameters: serde_json::json!({"operation": "hours_summary"}),
            });
        }
        steps.push(InferredStep {
            stage: "composition".into(),
            action: "draft_answer".into(),
            parameters: serde_json::Value::Null,
        });
        steps.push(InferredStep {
            stage: "validation".into(),
            action: "score_response".into(),
            parameters: serde_json::Value::Null,
        });
        Ok(InferredPlan {
            steps,
            needs_data: self.needs_data,
            context: HashMap::new(),
            criteria: self
                .criteria
                .iter()
                .map(|(id, description, expected)| InferredCriterion {
                    id: Some(id.to_string()),
                    description: description.to_string(),
                    expected: expected.to_string(),
                })
                .collect(),
        })
    }

    async fn compose(&self, ctx: &CompositionContext) -> EngineResult<DraftResponse> {
        let draft = match (&self.compose, &ctx.data_summary) {
            (ComposeBehavior::LongText(sentences), _) => {
                let text: String = (1..=*sentences)
                    .map(|i| format!("This is sentence number {i} of the answer. "))
                    .collect();
                DraftResponse::new(text.trim_end(), false, ResponseKind::Conversational, 0.9)
            }
            (ComposeBehavior::WithMarkup, Some(summary)) => DraftResponse::new(
                format!("<b>{summary}</b>"),
                true,
                ResponseKind::DataAnswer,
                0.9,
            ),
            (_, Some(summary)) => DraftResponse::new(
                format!("You have logged {summary}."),
                true,
                ResponseKind::DataAnswer,
                0.9,
            ),
            (_, None) => match &ctx.unavailable_note {
                Some(_) => DraftResponse::new(
                    "I couldn't fetch your hours right now. Please try again later.",
                    false,
                    ResponseKind::Apology,
                    0.6,
                ),
                None => DraftResponse::new(
                    "Happy to help with your timesheet questions.",
                    false,
                    ResponseKind::Conversational,
                    0.8,
                ),
            },
        };
        Ok(draft)
    }

    async fn refine(&self, ctx: &RefinementContext) -> EngineResult<DraftResponse> {
        // Incorporate the feedback: strip the offending markup
        let cleaned = ctx
            .prior_draft
            .text
            .replace("<b>", "")
            .replace("</b>", "")
            .replace("**", "");
        Ok(DraftResponse::new(
            cleaned,
            ctx.prior_draft.used_data,
            ctx.prior_draft.kind,
            0.7,
        ))
    }

    async fn judge(
        &self,
        criterion: &Criterion,
        content: &str,
        _question: &str,
    ) -> EngineResult<CriterionVerdict> {
        let (passed, feedback) = judge_by_convention(&criterion.expected, content);
        Ok(CriterionVerdict { passed, feedback })
    }

    async fn compose_failure(
        &self,
        _question: &str,
        _reason: &str,
        _channel: Channel,
    ) -> EngineResult<String> {
        Ok("I'm sorry, I wasn't able to put together a reliable answer. Please try again shortly.".into())
    }
}

/// Inference double whose judge capability is broken
pub struct BrokenJudgeInference {
    pub inner: ScriptedInference,
}

#[async_trait]
impl LanguageInference for BrokenJudgeInference {
    async fn plan(&self, ctx: &PlanningContext) -> EngineResult<InferredPlan> {
        self.inner.plan(ctx).await
    }
    async fn compose(&self, ctx: &CompositionContext) -> EngineResult<DraftResponse> {
        self.inner.compose(ctx).await
    }
    async fn refine(&self, ctx: &RefinementContext) -> EngineResult<DraftResponse> {
        self.inner.refine(ctx).await
    }
    async fn judge(
        &self,
        _criterion: &Criterion,
        _content: &str,
        _question: &str,
    ) -> EngineResult<CriterionVerdict> {
        Err(EngineError::InferenceError {
            operation: "judge",
            message: "judge backend offline".into(),
        })
    }
    async fn compose_failure(
        &self,
        question: &str,
        reason: &str,
        channel: Channel,
    ) -> EngineResult<String> {
        self.inner.compose_failure(question, reason, channel).await
    }
}

/// Retrieval double returning a fixed outcome
pub struct StaticRetrieval {
    pub outcome: Result<serde_json::Value, String>,
    pub summary: String,
}

impl StaticRetrieval {
    pub fn hours(logged: f64, target: f64) -> Self {
        Self {
            outcome: Ok(serde_json::json!({
                "hours_logged": logged,
                "hours_target": target,
            })),
            summary: format!("{logged:.1} of {target:.1} hours for the current week"),
        }
    }

    pub fn unavailable(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            summary: String::new(),
        }
    }
}

#[async_trait]
impl DataRetrieval for StaticRetrieval {
    async fn retrieve(
        &self,
        query: &TimesheetQuery,
        _credentials: &Credentials,
        _timezone: &str,
    ) -> Result<DataBundle, DataUnavailable> {
        match &self.outcome {
            Ok(facts) => Ok(DataBundle {
                query: query.clone(),
                facts: facts.clone(),
                summary: self.summary.clone(),
                retrieved_at: Utc::now(),
            }),
            Err(message) => Err(DataUnavailable::new(message.clone())),
        }
    }
}
