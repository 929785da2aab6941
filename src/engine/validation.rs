//! Validation stage
//!
//! Scores the formatted payload against the scorecard, one criterion per
//! judge call. Fail-closed: if judging itself breaks for a criterion, that
//! criterion is marked failed with a note, so unchecked content never
//! ships. Every criterion leaves this stage with a concrete verdict.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::inference::LanguageInference;
use crate::model::{FormattedPayload, Scorecard, ValidationResult};

use super::state::ValidationPass;
use super::with_timeout;

pub struct ValidationStage {
    inference: Arc<dyn LanguageInference>,
    judge_timeout: Duration,
}

impl ValidationStage {
    pub fn new(inference: Arc<dyn LanguageInference>, judge_timeout: Duration) -> Self {
        Self {
            inference,
            judge_timeout,
        }
    }

    /// Judge every unresolved criterion and derive the validation result.
    /// Infallible by contract; judging failures become failed criteria.
    pub async fn run(
        &self,
        payload: &FormattedPayload,
        scorecard: &mut Scorecard,
        question: &str,
        pass: ValidationPass,
    ) -> ValidationResult {
        if pass == ValidationPass::Refined {
            // The content changed wholesale; earlier verdicts no longer apply
            scorecard.reset_verdicts();
        }

        let unresolved: Vec<(usize, _)> = scorecard
            .criteria()
            .iter()
            .enumerate()
            .filter(|(_, c)| c.passed.is_none())
            .map(|(index, c)| (index, c.clone()))
            .collect();
        debug!(
            request_id = %scorecard.request_id,
            unresolved = unresolved.len(),
            "judging criteria"
        );

        // Judge calls are independent, so they run concurrently; verdicts
        // are applied back in criterion order.
        let content = payload.content.as_str();
        let verdicts = futures::future::join_all(unresolved.iter().map(|(_, criterion)| {
            let criterion = criterion.clone();
            async move {
                with_timeout(
                    "judge",
                    self.judge_timeout,
                    self.inference.judge(&criterion, content, question),
                )
                .await
            }
        }))
        .await;

        for ((index, criterion), verdict) in unresolved.into_iter().zip(verdicts) {
            match verdict {
                Ok(verdict) => {
                    let feedback = verdict
                        .feedback
                        .or_else(|| (!verdict.passed).then(|| criterion.expected.clone()));
                    scorecard.criteria_mut()[index].resolve(verdict.passed, feedback);
                }
                Err(e) => {
                    warn!(
                        request_id = %scorecard.request_id,
                        criterion = %criterion.id,
                        error = %e,
                        "judge call failed, marking criterion failed"
                    );
                    scorecard.criteria_mut()[index].resolve(
                        false,
                        Some(format!("criterion could not be judged: {}", e.kind())),
                    );
                }
            }
        }

        ValidationResult::from_scorecard(scorecard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::error::{EngineError, EngineResult};
    use crate::inference::{
        CompositionContext, CriterionVerdict, InferredPlan, PlanningContext, RefinementContext,
    };
    use crate::model::{Criterion, DraftResponse};
    use async_trait::async_trait;
    use uuid::Uuid;

    /// Judge double: passes criteria whose description appears in content,
    /// errors on criteria whose id starts with "broken".
    struct KeywordJudge;

    #[async_trait]
    impl LanguageInference for KeywordJudge {
        async fn plan(&self, _ctx: &PlanningContext) -> EngineResult<InferredPlan> {
            unimplemented!("not used in validation tests")
        }
        async fn compose(&self, _ctx: &CompositionContext) -> EngineResult<DraftResponse> {
            unimplemented!("not used in validation tests")
        }
        async fn refine(&self, _ctx: &RefinementContext) -> EngineResult<DraftResponse> {
            unimplemented!("not used in validation tests")
        }
        async fn judge(
            &self,
            criterion: &Criterion,
            content: &str,
            _question: &str,
        ) -> EngineResult<CriterionVerdict> {
            if criterion.id.starts_with("broken") {
                return Err(EngineError::InferenceError {
                    operation: "judge",
                    message: "judge backend down".into(),
                });
            }
            let passed = content.contains(criterion.expected.as_str());
            Ok(CriterionVerdict {
                passed,
                feedback: (!passed).then(|| format!("missing '{}'", criterion.expected)),
            })
        }
        async fn compose_failure(
            &self,
            _question: &str,
            _reason: &str,
            _channel: Channel,
        ) -> EngineResult<String> {
            unimplemented!("not used in validation tests")
        }
    }

    fn stage() -> ValidationStage {
        ValidationStage::new(Arc::new(KeywordJudge), Duration::from_secs(1))
    }

    fn payload(content: &str) -> FormattedPayload {
        FormattedPayload::single(Channel::Sms, content)
    }

    #[tokio::test]
    async fn test_all_criteria_judged_and_passing() {
        let id = Uuid::new_v4();
        let mut card = Scorecard::new(
            id,
            vec![
                Criterion::new("c1", "mentions logged hours", "32"),
                Criterion::new("c2", "mentions the target", "40"),
            ],
        )
        .unwrap();
        let result = stage()
            .run(
                &payload("You logged 32 of 40 hours."),
                &mut card,
                "check my hours",
                ValidationPass::Initial,
            )
            .await;
        assert!(result.passed);
        assert!(result.failed_criterion_ids.is_empty());
        assert!(result.feedback.is_none());
        assert!(card.criteria().iter().all(|c| c.passed == Some(true)));
    }

    #[tokio::test]
    async fn test_failed_criterion_aggregates_feedback() {
        let id = Uuid::new_v4();
        let mut card = Scorecard::new(
            id,
            vec![
                Criterion::new("c1", "mentions logged hours", "32"),
                Criterion::new("c2", "mentions the target", "40"),
            ],
        )
        .unwrap();
        let result = stage()
            .run(
                &payload("You logged 32 hours."),
                &mut card,
                "check my hours",
                ValidationPass::Initial,
            )
            .await;
        assert!(!result.passed);
        assert_eq!(result.failed_criterion_ids, vec!["c2".to_string()]);
        let feedback = result.feedback.unwrap();
        assert!(feedback.contains("[c2]"));
        assert!(feedback.contains("missing '40'"));
    }

    #[tokio::test]
    async fn test_judge_failure_is_fail_closed() {
        let id = Uuid::new_v4();
        let mut card = Scorecard::new(
            id,
            vec![Criterion::new("broken-c1", "anything at all here", "x")],
        )
        .unwrap();
        let result = stage()
            .run(&payload("x"), &mut card, "q", ValidationPass::Initial)
            .await;
        assert!(!result.passed);
        assert_eq!(result.failed_criterion_ids, vec!["broken-c1".to_string()]);
        assert!(result
            .feedback
            .unwrap()
            .contains("criterion could not be judged"));
        // No criterion remains unjudged
        assert!(card.criteria().iter().all(|c| c.passed.is_some()));
    }

    #[tokio::test]
    async fn test_refined_pass_rejudges_everything() {
        let id = Uuid::new_v4();
        let mut card = Scorecard::new(
            id,
            vec![
                Criterion::new("c1", "mentions logged hours", "32"),
                Criterion::new("c2", "mentions the target", "40"),
            ],
        )
        .unwrap();
        // First pass: c2 fails
        let first = stage()
            .run(
                &payload("You logged 32 hours."),
                &mut card,
                "q",
                ValidationPass::Initial,
            )
            .await;
        assert!(!first.passed);

        // Refined content satisfies both; previous verdicts are discarded
        let second = stage()
            .run(
                &payload("You logged 32 of 40 hours."),
                &mut card,
                "q",
                ValidationPass::Refined,
            )
            .await;
        assert!(second.passed);
        assert!(card.criteria().iter().all(|c| c.passed == Some(true)));
    }
}
