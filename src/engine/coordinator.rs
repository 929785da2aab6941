//! Request coordinator
//!
//! The per-request state machine. `step` executes the stage the status
//! names and records the transition; `run` drives the machine until
//! `Completed`. The transition table is the only consumer of stage
//! results, and the audit trail is emitted here after each transition
//! rather than inside the stages.
//!
//! Transition map:
//!
//! ```text
//! Created → Planning → (Retrieving) → Composing → Formatting → Validating
//!     Validating(initial):  pass → Completed
//!                           fail → Refining → Formatting(refined) → Validating(refined)
//!     Validating(refined):  pass → Completed
//!                           fail → Failing → Completed
//! ```
//!
//! Any stage that times out or errors in a non-recoverable way jumps
//! straight to `Failing`, so every accepted request terminates with
//! exactly one final response.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, warn};

use crate::audit::{AuditSink, FailureRecord, InteractionRecord};
use crate::channel::ChannelPolicyTable;
use crate::config::StyleConfig;
use crate::error::EngineError;
use crate::history::ConversationTurn;
use crate::inference::{CompositionContext, FailedCriterion, PlanningContext, RefinementContext};
use crate::model::{FormattedPayload, StageName};
use crate::retrieval::Credentials;

use super::composition::CompositionStage;
use super::failure::FailureComposer;
use super::formatting::FormattingStage;
use super::planning::PlanningStage;
use super::retrieval::RetrievalStage;
use super::state::{FailureReason, ValidationPass, WorkflowState, WorkflowStatus};
use super::validation::ValidationStage;

/// Per-request inputs that live outside the serializable workflow state
pub struct RequestContext {
    pub credentials: Credentials,
    pub timezone: String,
    pub display_name: Option<String>,
    pub history: Vec<ConversationTurn>,
    pub user_context: HashMap<String, String>,
}

pub struct RequestCoordinator {
    planning: PlanningStage,
    retrieval: RetrievalStage,
    composition: CompositionStage,
    formatting: FormattingStage,
    validation: ValidationStage,
    failure: FailureComposer,
    policies: Arc<ChannelPolicyTable>,
    style: StyleConfig,
    audit: Arc<dyn AuditSink>,
}

impl RequestCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        planning: PlanningStage,
        retrieval: RetrievalStage,
        composition: CompositionStage,
        formatting: FormattingStage,
        validation: ValidationStage,
        failure: FailureComposer,
        policies: Arc<ChannelPolicyTable>,
        style: StyleConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            planning,
            retrieval,
            composition,
            formatting,
            validation,
            failure,
            policies,
            style,
            audit,
        }
    }

    /// Drive the workflow to `Completed`. Also the resume entry point: a
    /// state deserialized mid-flight continues from its recorded status.
    pub async fn run(&self, state: &mut WorkflowState, ctx: &RequestContext) {
        while !state.status.is_terminal() {
            self.step(state, ctx).await;
        }
        self.retrieval.finish(state.request_id).await;
    }

    /// Execute exactly one state transition.
    pub async fn step(&self, state: &mut WorkflowState, ctx: &RequestContext) {
        debug!(request_id = %state.request_id, status = %state.status, "workflow step");
        match state.status {
            WorkflowStatus::Created => {
                state.status = WorkflowStatus::Planning;
            }
            WorkflowStatus::Planning => self.step_planning(state, ctx).await,
            WorkflowStatus::Retrieving => self.step_retrieving(state, ctx).await,
            WorkflowStatus::Composing => self.step_composing(state, ctx).await,
            WorkflowStatus::Formatting { pass } => self.step_formatting(state, ctx, pass),
            WorkflowStatus::Validating { pass } => self.step_validating(state, pass).await,
            WorkflowStatus::Refining => self.step_refining(state).await,
            WorkflowStatus::Failing { reason } => self.step_failing(state, ctx, reason).await,
            WorkflowStatus::Completed => {
                debug!(request_id = %state.request_id, "step on completed workflow ignored");
            }
        }
    }

    async fn step_planning(&self, state: &mut WorkflowState, ctx: &RequestContext) {
        let started = Instant::now();
        let planning_ctx = PlanningContext {
            request_id: state.request_id,
            message: state.question.clone(),
            channel: state.channel,
            history: ctx.history.clone(),
            user_context: ctx.user_context.clone(),
        };
        match self.planning.run(&planning_ctx).await {
            Ok((plan, scorecard)) => {
                self.audit.record_interaction(InteractionRecord::success(
                    state.request_id,
                    StageName::Planning,
                    "plan",
                    &state.question,
                    &format!(
                        "{} steps, {} criteria, needs_data={}",
                        plan.steps().len(),
                        scorecard.criteria().len(),
                        plan.needs_data
                    ),
                    elapsed_ms(started),
                ));
                let needs_data = plan.needs_data;
                state.plan = Some(plan);
                state.scorecard = Some(scorecard);
                state.status = if needs_data {
                    WorkflowStatus::Retrieving
                } else {
                    WorkflowStatus::Composing
                };
            }
            Err(e) => self.fail_stage(state, StageName::Planning, "plan", &e, started),
        }
    }

    async fn step_retrieving(&self, state: &mut WorkflowState, ctx: &RequestContext) {
        let started = Instant::now();
        let Some(plan) = state.plan.clone() else {
            self.corrupt_state(state, "retrieving without a plan");
            return;
        };
        match self
            .retrieval
            .run(state.request_id, &plan, &ctx.credentials, &ctx.timezone)
            .await
        {
            Ok(bundle) => {
                self.audit.record_interaction(InteractionRecord::success(
                    state.request_id,
                    StageName::Retrieval,
                    "retrieve",
                    &format!("{:?}", bundle.query),
                    &bundle.summary,
                    elapsed_ms(started),
                ));
                state.data = Some(bundle);
            }
            Err(unavailable) => {
                // Typed failure: logged, then carried forward as context
                self.audit.record_interaction(InteractionRecord::failure(
                    state.request_id,
                    StageName::Retrieval,
                    "retrieve",
                    &state.question,
                    unavailable.message.as_str(),
                    elapsed_ms(started),
                ));
                state.data_unavailable = Some(unavailable.message);
            }
        }
        state.status = WorkflowStatus::Composing;
    }

    async fn step_composing(&self, state: &mut WorkflowState, ctx: &RequestContext) {
        let started = Instant::now();
        let composition_ctx = CompositionContext {
            request_id: state.request_id,
            question: state.question.clone(),
            data_summary: state.data.as_ref().map(|d| d.summary.clone()),
            unavailable_note: state.data_unavailable.clone(),
            history: ctx.history.clone(),
            user_context: ctx.user_context.clone(),
            tone: self.style.tone,
        };
        match self.composition.compose(&composition_ctx).await {
            Ok(draft) => {
                self.audit.record_interaction(InteractionRecord::success(
                    state.request_id,
                    StageName::Composition,
                    "compose",
                    &state.question,
                    &draft.text,
                    elapsed_ms(started),
                ));
                state.draft = Some(draft);
                state.status = WorkflowStatus::Formatting {
                    pass: ValidationPass::Initial,
                };
            }
            Err(e) => self.fail_stage(state, StageName::Composition, "compose", &e, started),
        }
    }

    fn step_formatting(&self, state: &mut WorkflowState, ctx: &RequestContext, pass: ValidationPass) {
        let started = Instant::now();
        let Some(draft) = state.draft.clone() else {
            self.corrupt_state(state, "formatting without a draft");
            return;
        };
        let payload = self.render(&draft.text, state, ctx);
        self.audit.record_interaction(InteractionRecord::success(
            state.request_id,
            StageName::Formatting,
            "format",
            &draft.text,
            &format!(
                "channel={}, split={}, parts={}",
                payload.channel,
                payload.is_split,
                payload.parts.len()
            ),
            elapsed_ms(started),
        ));
        state.payload = Some(payload);
        state.status = WorkflowStatus::Validating { pass };
    }

    async fn step_validating(&self, state: &mut WorkflowState, pass: ValidationPass) {
        let started = Instant::now();
        let Some(payload) = state.payload.clone() else {
            self.corrupt_state(state, "validating without a payload");
            return;
        };
        // Move the scorecard out for the judging pass; validation is its
        // only mutator while the request is in flight.
        let Some(mut scorecard) = state.scorecard.take() else {
            self.corrupt_state(state, "validating without a scorecard");
            return;
        };
        let question = state.question.clone();
        let result = self
            .validation
            .run(&payload, &mut scorecard, &question, pass)
            .await;
        state.scorecard = Some(scorecard);
        self.audit.record_interaction(InteractionRecord::success(
            state.request_id,
            StageName::Validation,
            "validate",
            &payload.content,
            &if result.passed {
                "all criteria passed".to_string()
            } else {
                format!("failed: {}", result.failed_criterion_ids.join(", "))
            },
            elapsed_ms(started),
        ));
        let passed = result.passed;
        state.validation = Some(result);

        if passed {
            state.final_response = Some(payload);
            state.status = WorkflowStatus::Completed;
            return;
        }
        match pass {
            // The only edge into Refining: first validation, zero refinements
            ValidationPass::Initial => {
                state.note_refinement();
                state.status = WorkflowStatus::Refining;
            }
            // After the one refinement there is no way back, only forward
            ValidationPass::Refined => {
                state.status = WorkflowStatus::Failing {
                    reason: FailureReason::ValidationUnsatisfied,
                };
            }
        }
    }

    async fn step_refining(&self, state: &mut WorkflowState) {
        let started = Instant::now();
        let (Some(draft), Some(scorecard)) = (state.draft.clone(), state.scorecard.clone())
        else {
            self.corrupt_state(state, "refining without draft or scorecard");
            return;
        };
        let failed_criteria: Vec<FailedCriterion> = scorecard
            .failed_criteria()
            .into_iter()
            .map(|c| FailedCriterion {
                id: c.id.clone(),
                description: c.description.clone(),
                feedback: c
                    .feedback
                    .clone()
                    .unwrap_or_else(|| c.expected.clone()),
            })
            .collect();
        let refinement_ctx = RefinementContext {
            request_id: state.request_id,
            question: state.question.clone(),
            prior_draft: draft.clone(),
            failed_criteria,
            tone: self.style.tone,
        };
        match self.composition.refine(&refinement_ctx).await {
            Ok(new_draft) => {
                self.audit.record_interaction(InteractionRecord::success(
                    state.request_id,
                    StageName::Refinement,
                    "refine",
                    &refinement_ctx.prior_draft.text,
                    &new_draft.text,
                    elapsed_ms(started),
                ));
                state.draft = Some(new_draft);
                state.status = WorkflowStatus::Formatting {
                    pass: ValidationPass::Refined,
                };
            }
            Err(e) => self.fail_stage(state, StageName::Refinement, "refine", &e, started),
        }
    }

    async fn step_failing(
        &self,
        state: &mut WorkflowState,
        ctx: &RequestContext,
        reason: FailureReason,
    ) {
        let started = Instant::now();
        let message = self
            .failure
            .run(&state.question, reason, state.channel)
            .await;
        debug_assert!(message.approved);

        let payload = self.render(&message.text, state, ctx);
        self.audit.record_interaction(InteractionRecord::success(
            state.request_id,
            StageName::Failure,
            "compose_failure",
            &state.question,
            &message.text,
            elapsed_ms(started),
        ));
        self.audit.record_failure(FailureRecord {
            request_id: state.request_id,
            question: state.question.clone(),
            scorecard: state.scorecard.clone(),
            refinement_attempted: state.refinement_attempted(),
            refinement_succeeded: false,
            message_sent: message.text,
            root_cause: reason.as_str().to_string(),
            timestamp: Utc::now(),
        });

        state.graceful_failure = true;
        state.final_response = Some(payload);
        state.status = WorkflowStatus::Completed;
    }

    /// Render text channel-correctly; a missing policy degrades to a raw
    /// single part rather than blocking delivery.
    fn render(&self, text: &str, state: &WorkflowState, ctx: &RequestContext) -> FormattedPayload {
        match self.policies.policy(state.channel) {
            Some(policy) => self.formatting.run(
                text,
                state.channel,
                policy,
                &self.style,
                ctx.display_name.as_deref(),
            ),
            None => {
                warn!(channel = %state.channel, "no channel policy at render time");
                FormattedPayload::single(state.channel, text)
            }
        }
    }

    fn fail_stage(
        &self,
        state: &mut WorkflowState,
        stage: StageName,
        action: &str,
        error: &EngineError,
        started: Instant,
    ) {
        warn!(
            request_id = %state.request_id,
            stage = %stage,
            error = %error,
            "stage failed, routing to graceful failure"
        );
        self.audit.record_interaction(InteractionRecord::failure(
            state.request_id,
            stage,
            action,
            &state.question,
            error.to_string(),
            started.elapsed().as_millis() as u64,
        ));
        state.status = WorkflowStatus::Failing {
            reason: failure_reason(error),
        };
    }

    fn corrupt_state(&self, state: &mut WorkflowState, detail: &str) {
        warn!(request_id = %state.request_id, detail, "inconsistent workflow state");
        state.status = WorkflowStatus::Failing {
            reason: FailureReason::Internal,
        };
    }
}

fn failure_reason(error: &EngineError) -> FailureReason {
    match error {
        EngineError::InferenceTimeout { .. } => FailureReason::InferenceTimeout,
        EngineError::InferenceError { .. } => FailureReason::InferenceError,
        _ => FailureReason::Internal,
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
