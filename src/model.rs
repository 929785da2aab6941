//! Pipeline data model
//!
//! The shared value types flowing between stages: execution plans,
//! scorecards, drafts, formatted payloads. Everything here derives serde
//! so an in-flight workflow can be snapshotted and inspected.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::Channel;

/// Stage names as they appear in plans and audit records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Planning,
    Retrieval,
    Composition,
    Formatting,
    Validation,
    Refinement,
    Failure,
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageName::Planning => "planning",
            StageName::Retrieval => "retrieval",
            StageName::Composition => "composition",
            StageName::Formatting => "formatting",
            StageName::Validation => "validation",
            StageName::Refinement => "refinement",
            StageName::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// One planned step: which stage runs, what it does, with what parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub stage: StageName,
    pub action: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Immutable execution plan produced once by the planning stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub request_id: Uuid,
    /// Ordered steps, never empty
    steps: Vec<PlanStep>,
    pub needs_data: bool,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ExecutionPlan {
    /// Build a plan, rejecting an empty step list.
    pub fn new(
        request_id: Uuid,
        steps: Vec<PlanStep>,
        needs_data: bool,
        context: HashMap<String, String>,
    ) -> Option<Self> {
        if steps.is_empty() {
            return None;
        }
        Some(Self {
            request_id,
            steps,
            needs_data,
            context,
        })
    }

    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    /// First step targeting the given stage, if the plan has one.
    pub fn step_for(&self, stage: StageName) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.stage == stage)
    }
}

/// One measurable pass/fail check on the outgoing response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Criterion {
    /// Unique within a scorecard
    pub id: String,
    pub description: String,
    /// Description of the pass condition
    pub expected: String,
    /// Tri-state: None until judged
    #[serde(default)]
    pub passed: Option<bool>,
    /// Present iff passed == Some(false)
    #[serde(default)]
    pub feedback: Option<String>,
}

impl Criterion {
    pub fn new(id: impl Into<String>, description: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            expected: expected.into(),
            passed: None,
            feedback: None,
        }
    }

    /// Record a verdict, keeping the feedback/passed invariant intact.
    pub fn resolve(&mut self, passed: bool, feedback: Option<String>) {
        self.passed = Some(passed);
        self.feedback = if passed { None } else { feedback };
    }
}

/// Ordered set of acceptance criteria for one request's response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scorecard {
    pub request_id: Uuid,
    criteria: Vec<Criterion>,
}

impl Scorecard {
    /// Build a scorecard, rejecting an empty criteria list.
    pub fn new(request_id: Uuid, criteria: Vec<Criterion>) -> Option<Self> {
        if criteria.is_empty() {
            return None;
        }
        Some(Self {
            request_id,
            criteria,
        })
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn criteria_mut(&mut self) -> &mut [Criterion] {
        &mut self.criteria
    }

    /// True iff every criterion has been judged and passed.
    pub fn overall_passed(&self) -> bool {
        self.criteria.iter().all(|c| c.passed == Some(true))
    }

    pub fn failed_criterion_ids(&self) -> Vec<String> {
        self.criteria
            .iter()
            .filter(|c| c.passed == Some(false))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Criteria that failed, in scorecard order.
    pub fn failed_criteria(&self) -> Vec<&Criterion> {
        self.criteria
            .iter()
            .filter(|c| c.passed == Some(false))
            .collect()
    }

    /// Clear all verdicts so a revised response can be judged from scratch.
    pub fn reset_verdicts(&mut self) {
        for criterion in &mut self.criteria {
            criterion.passed = None;
            criterion.feedback = None;
        }
    }
}

/// Outcome of scoring one formatted payload against a scorecard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub request_id: Uuid,
    pub passed: bool,
    pub failed_criterion_ids: Vec<String>,
    /// Aggregated feedback from failed criteria, present iff !passed
    pub feedback: Option<String>,
}

impl ValidationResult {
    /// Derive the result from a fully-judged scorecard.
    pub fn from_scorecard(scorecard: &Scorecard) -> Self {
        let passed = scorecard.overall_passed();
        let failed_criterion_ids = scorecard.failed_criterion_ids();
        let feedback = if passed {
            None
        } else {
            let aggregated: Vec<String> = scorecard
                .failed_criteria()
                .iter()
                .map(|c| match &c.feedback {
                    Some(f) => format!("[{}] {}", c.id, f),
                    None => format!("[{}] {}", c.id, c.description),
                })
                .collect();
            Some(aggregated.join("\n"))
        };
        Self {
            request_id: scorecard.request_id,
            passed,
            failed_criterion_ids,
            feedback,
        }
    }
}

/// Classification of a composed draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Answers with retrieved timesheet facts
    DataAnswer,
    /// Small talk or guidance that needed no data
    Conversational,
    /// Data was needed but unavailable
    Apology,
}

/// Channel-agnostic draft produced by the composition stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftResponse {
    pub text: String,
    pub used_data: bool,
    pub kind: ResponseKind,
    /// Composer self-assessment, clamped to [0, 1]
    pub confidence: f32,
}

impl DraftResponse {
    pub fn new(text: impl Into<String>, used_data: bool, kind: ResponseKind, confidence: f32) -> Self {
        Self {
            text: text.into(),
            used_data,
            kind,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// One delivery unit of a (possibly split) outbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePart {
    /// 1-based position in the delivery sequence
    pub sequence: u32,
    pub content: String,
    /// Marker text like "(2/4)" embedded at the end of `content`
    #[serde(default)]
    pub continuation: Option<String>,
}

/// Channel-specific rendering of a draft, split when the channel demands it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormattedPayload {
    pub channel: Channel,
    /// The full logical content before splitting
    pub content: String,
    pub is_split: bool,
    /// Ordered parts when split; empty otherwise
    pub parts: Vec<MessagePart>,
}

impl FormattedPayload {
    /// A single-part payload that fits the channel as-is.
    pub fn single(channel: Channel, content: impl Into<String>) -> Self {
        Self {
            channel,
            content: content.into(),
            is_split: false,
            parts: Vec::new(),
        }
    }

    /// Reconstruct the pre-split content by stripping continuation markers
    /// and concatenating parts in sequence order.
    pub fn reassembled(&self) -> String {
        if !self.is_split {
            return self.content.clone();
        }
        let mut parts: Vec<&MessagePart> = self.parts.iter().collect();
        parts.sort_by_key(|p| p.sequence);
        parts
            .iter()
            .map(|p| match &p.continuation {
                Some(marker) => p
                    .content
                    .strip_suffix(marker.as_str())
                    .map(|c| c.strip_suffix(' ').unwrap_or(c))
                    .unwrap_or(p.content.as_str()),
                None => p.content.as_str(),
            })
            .collect::<Vec<_>>()
            .concat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criterion(id: &str, passed: Option<bool>) -> Criterion {
        let mut c = Criterion::new(id, format!("criterion {id}"), "holds");
        if let Some(p) = passed {
            c.resolve(p, Some("did not hold".into()));
        }
        c
    }

    #[test]
    fn test_plan_rejects_empty_steps() {
        assert!(ExecutionPlan::new(Uuid::new_v4(), vec![], false, HashMap::new()).is_none());
    }

    #[test]
    fn test_scorecard_rejects_empty_criteria() {
        assert!(Scorecard::new(Uuid::new_v4(), vec![]).is_none());
    }

    #[test]
    fn test_overall_passed_requires_every_criterion() {
        let card = Scorecard::new(
            Uuid::new_v4(),
            vec![criterion("c1", Some(true)), criterion("c2", Some(true))],
        )
        .unwrap();
        assert!(card.overall_passed());

        let card = Scorecard::new(
            Uuid::new_v4(),
            vec![criterion("c1", Some(true)), criterion("c2", Some(false))],
        )
        .unwrap();
        assert!(!card.overall_passed());
        assert_eq!(card.failed_criterion_ids(), vec!["c2".to_string()]);
    }

    #[test]
    fn test_unknown_criterion_blocks_overall_pass() {
        let card = Scorecard::new(
            Uuid::new_v4(),
            vec![criterion("c1", Some(true)), criterion("c2", None)],
        )
        .unwrap();
        assert!(!card.overall_passed());
    }

    #[test]
    fn test_validation_result_mirrors_scorecard() {
        let card = Scorecard::new(
            Uuid::new_v4(),
            vec![criterion("c1", Some(false)), criterion("c2", Some(true))],
        )
        .unwrap();
        let result = ValidationResult::from_scorecard(&card);
        assert!(!result.passed);
        assert_eq!(result.failed_criterion_ids, vec!["c1".to_string()]);
        assert!(result.feedback.as_deref().unwrap().contains("[c1]"));

        let mut card = card;
        card.criteria_mut()[0].resolve(true, None);
        let result = ValidationResult::from_scorecard(&card);
        assert!(result.passed);
        assert!(result.failed_criterion_ids.is_empty());
        assert!(result.feedback.is_none());
    }

    #[test]
    fn test_criterion_resolve_clears_feedback_on_pass() {
        let mut c = criterion("c1", Some(false));
        assert!(c.feedback.is_some());
        c.resolve(true, Some("ignored".into()));
        assert!(c.feedback.is_none());
    }

    #[test]
    fn test_draft_confidence_clamped() {
        let draft = DraftResponse::new("hi", false, ResponseKind::Conversational, 1.7);
        assert_eq!(draft.confidence, 1.0);
    }

    #[test]
    fn test_reassembled_unsplit_payload() {
        let payload = FormattedPayload::single(Channel::Sms, "hello");
        assert_eq!(payload.reassembled(), "hello");
    }
}
