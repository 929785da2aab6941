//! Workflow state machine model
//!
//! One `WorkflowState` per request, mutated only by the coordinator. The
//! status enum encodes which validation pass a stage belongs to, so the
//! edge into `Refining` only exists from the initial validation; a second
//! refinement is unrepresentable rather than merely counted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::Channel;
use crate::model::{
    DraftResponse, ExecutionPlan, FormattedPayload, Scorecard, ValidationResult,
};
use crate::retrieval::DataBundle;

/// Which trip through compose→format→validate this is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPass {
    Initial,
    Refined,
}

/// Coarse classification carried into the failure composer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Validation still failing after the permitted refinement
    ValidationUnsatisfied,
    InferenceTimeout,
    InferenceError,
    /// Anything unexpected a stage could not type
    Internal,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ValidationUnsatisfied => "validation_unsatisfied",
            FailureReason::InferenceTimeout => "inference_timeout",
            FailureReason::InferenceError => "inference_error",
            FailureReason::Internal => "internal",
        }
    }
}

/// Position of a request in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Planning,
    Retrieving,
    Composing,
    Formatting { pass: ValidationPass },
    Validating { pass: ValidationPass },
    Refining,
    Failing { reason: FailureReason },
    Completed,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Created => f.write_str("created"),
            WorkflowStatus::Planning => f.write_str("planning"),
            WorkflowStatus::Retrieving => f.write_str("retrieving"),
            WorkflowStatus::Composing => f.write_str("composing"),
            WorkflowStatus::Formatting {
                pass: ValidationPass::Initial,
            } => f.write_str("formatting"),
            WorkflowStatus::Formatting {
                pass: ValidationPass::Refined,
            } => f.write_str("formatting(refined)"),
            WorkflowStatus::Validating {
                pass: ValidationPass::Initial,
            } => f.write_str("validating"),
            WorkflowStatus::Validating {
                pass: ValidationPass::Refined,
            } => f.write_str("validating(refined)"),
            WorkflowStatus::Refining => f.write_str("refining"),
            WorkflowStatus::Failing { reason } => write!(f, "failing({})", reason.as_str()),
            WorkflowStatus::Completed => f.write_str("completed"),
        }
    }
}

/// Full mutable snapshot of one request's progress.
///
/// Serializable so an in-flight request can be inspected or resumed from
/// the last completed stage after a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub request_id: Uuid,
    pub user_id: String,
    pub conversation_id: String,
    pub channel: Channel,
    pub question: String,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub scorecard: Option<Scorecard>,
    #[serde(default)]
    pub data: Option<DataBundle>,
    /// Set when retrieval reported a typed failure
    #[serde(default)]
    pub data_unavailable: Option<String>,
    #[serde(default)]
    pub draft: Option<DraftResponse>,
    #[serde(default)]
    pub payload: Option<FormattedPayload>,
    #[serde(default)]
    pub validation: Option<ValidationResult>,
    /// 0 or 1, never higher
    pub refinement_count: u8,
    #[serde(default)]
    pub graceful_failure: bool,
    #[serde(default)]
    pub final_response: Option<FormattedPayload>,
    pub started_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(
        request_id: Uuid,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        channel: Channel,
        question: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            channel,
            question: question.into(),
            status: WorkflowStatus::Created,
            plan: None,
            scorecard: None,
            data: None,
            data_unavailable: None,
            draft: None,
            payload: None,
            validation: None,
            refinement_count: 0,
            graceful_failure: false,
            final_response: None,
            started_at: Utc::now(),
        }
    }

    pub fn refinement_attempted(&self) -> bool {
        self.refinement_count > 0
    }

    /// Record that the single permitted refinement has been entered.
    pub fn note_refinement(&mut self) {
        debug_assert_eq!(self.refinement_count, 0, "refinement may only run once");
        self.refinement_count = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(WorkflowStatus::Created.to_string(), "created");
        assert_eq!(
            WorkflowStatus::Validating {
                pass: ValidationPass::Refined
            }
            .to_string(),
            "validating(refined)"
        );
        assert_eq!(
            WorkflowStatus::Failing {
                reason: FailureReason::InferenceTimeout
            }
            .to_string(),
            "failing(inference_timeout)"
        );
    }

    #[test]
    fn test_state_snapshot_roundtrip() {
        let mut state = WorkflowState::new(
            Uuid::new_v4(),
            "u-1",
            "conv-1",
            Channel::Sms,
            "Check my timesheet",
        );
        state.status = WorkflowStatus::Validating {
            pass: ValidationPass::Initial,
        };
        state.note_refinement();

        let json = serde_json::to_string(&state).unwrap();
        let restored: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.status, state.status);
        assert_eq!(restored.refinement_count, 1);
        assert_eq!(restored.question, "Check my timesheet");
    }

    #[test]
    fn test_only_completed_is_terminal() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(!WorkflowStatus::Refining.is_terminal());
        assert!(!WorkflowStatus::Failing {
            reason: FailureReason::Internal
        }
        .is_terminal());
    }
}
