//! Planning stage
//!
//! Turns the inbound message plus context into an `ExecutionPlan` and a
//! `Scorecard`. Reasoning is delegated to the inference port, but this
//! stage owns the shape invariants: non-empty steps, at least one
//! measurable criterion. Non-conforming inference output is repaired here,
//! never propagated.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use crate::channel::{Channel, ChannelPolicyTable};
use crate::error::{EngineError, EngineResult};
use crate::inference::{InferredCriterion, InferredPlan, LanguageInference, PlanningContext};
use crate::model::{Criterion, ExecutionPlan, PlanStep, Scorecard, StageName};

use super::with_timeout;

/// Criterion descriptions shorter than this are treated as vacuous
const MIN_CRITERION_LEN: usize = 10;

/// Reject malformed inbound input before any workflow state exists.
pub fn validate_input(
    message: &str,
    channel: &str,
    policies: &ChannelPolicyTable,
) -> EngineResult<Channel> {
    if message.trim().is_empty() {
        return Err(EngineError::InvalidInput("message is empty".into()));
    }
    let channel: Channel = channel.parse()?;
    if policies.policy(channel).is_none() {
        return Err(EngineError::InvalidInput(format!(
            "no policy configured for channel '{channel}'"
        )));
    }
    Ok(channel)
}

pub struct PlanningStage {
    inference: Arc<dyn LanguageInference>,
    timeout: Duration,
}

impl PlanningStage {
    pub fn new(inference: Arc<dyn LanguageInference>, timeout: Duration) -> Self {
        Self { inference, timeout }
    }

    /// Produce the plan and scorecard for one request.
    pub async fn run(&self, ctx: &PlanningContext) -> EngineResult<(ExecutionPlan, Scorecard)> {
        let inferred = with_timeout(
            "plan",
            self.timeout,
            self.inference.plan(ctx),
        )
        .await?;
        Ok(conform(ctx.request_id, inferred))
    }
}

/// Enforce the shape invariants, repairing where the inference fell short.
fn conform(request_id: Uuid, inferred: InferredPlan) -> (ExecutionPlan, Scorecard) {
    let mut steps: Vec<PlanStep> = inferred
        .steps
        .into_iter()
        .filter_map(|step| {
            let stage = parse_stage(&step.stage)?;
            Some(PlanStep {
                stage,
                action: step.action,
                parameters: step.parameters,
            })
        })
        .collect();

    let has_retrieval = steps.iter().any(|s| s.stage == StageName::Retrieval);
    let needs_data = inferred.needs_data || has_retrieval;

    if steps.is_empty() {
        warn!(%request_id, "inference produced no usable plan steps, using defaults");
        if needs_data {
            steps.push(PlanStep {
                stage: StageName::Retrieval,
                action: "fetch_timesheet_data".into(),
                parameters: serde_json::Value::Null,
            });
        }
        steps.push(PlanStep {
            stage: StageName::Composition,
            action: "draft_answer".into(),
            parameters: serde_json::Value::Null,
        });
        steps.push(PlanStep {
            stage: StageName::Formatting,
            action: "render_for_channel".into(),
            parameters: serde_json::Value::Null,
        });
        steps.push(PlanStep {
            stage: StageName::Validation,
            action: "score_response".into(),
            parameters: serde_json::Value::Null,
        });
    }

    let criteria = conform_criteria(request_id, inferred.criteria);

    // Both constructors only reject emptiness, which the repair above rules out.
    let plan = ExecutionPlan::new(request_id, steps, needs_data, inferred.context)
        .unwrap_or_else(|| unreachable!("plan steps repaired to be non-empty"));
    let scorecard = Scorecard::new(request_id, criteria)
        .unwrap_or_else(|| unreachable!("criteria repaired to be non-empty"));
    (plan, scorecard)
}

fn conform_criteria(request_id: Uuid, inferred: Vec<InferredCriterion>) -> Vec<Criterion> {
    let mut criteria: Vec<Criterion> = Vec::new();
    for (index, raw) in inferred.into_iter().enumerate() {
        let description = raw.description.trim().to_string();
        if description.len() < MIN_CRITERION_LEN {
            warn!(%request_id, criterion = %description, "dropping vacuous criterion");
            continue;
        }
        let id = raw
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("c{}", index + 1));
        // Inference occasionally reuses ids; keep them unique within the card
        let id = if criteria.iter().any(|c: &Criterion| c.id == id) {
            format!("{id}-{}", index + 1)
        } else {
            id
        };
        let expected = if raw.expected.trim().is_empty() {
            "the response satisfies this criterion".to_string()
        } else {
            raw.expected.trim().to_string()
        };
        criteria.push(Criterion::new(id, description, expected));
    }

    if criteria.is_empty() {
        warn!(%request_id, "inference produced no usable criteria, using default");
        criteria.push(Criterion::new(
            "c1",
            "The response directly addresses the user's timesheet question",
            "the answer speaks to the question that was asked",
        ));
    }
    criteria
}

fn parse_stage(raw: &str) -> Option<StageName> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "planning" | "plan" => Some(StageName::Planning),
        "retrieval" | "retrieve" | "data" => Some(StageName::Retrieval),
        "composition" | "compose" | "draft" => Some(StageName::Composition),
        "formatting" | "format" => Some(StageName::Formatting),
        "validation" | "validate" => Some(StageName::Validation),
        other => {
            warn!(stage = other, "unknown plan stage, dropping step");
            None
        }
    }
}
