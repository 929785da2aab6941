//! End-to-end pipeline scenarios driven through the engine with scripted
//! port doubles: the happy path, refinement, graceful failure, missing
//! data, input rejection, timeouts, fail-closed judging, splitting,
//! history threading and mid-flight resume.

mod helpers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use helpers::{BrokenJudgeInference, ComposeBehavior, ScriptedInference, StaticRetrieval};
use ts_concierge::audit::MemoryAuditSink;
use ts_concierge::engine::{
    CompositionStage, Engine, FailureComposer, FormattingStage, InboundMessage, PlanningStage,
    RequestContext, RequestCoordinator, RetrievalStage, ValidationStage, WorkflowState,
    WorkflowStatus,
};
use ts_concierge::inference::LanguageInference;
use ts_concierge::model::StageName;
use ts_concierge::retrieval::{Credentials, DataRetrieval};
use ts_concierge::{
    Channel, ChannelPolicyTable, EngineConfig, HistoryStore, InMemoryHistoryStore, StyleConfig,
    TimeoutConfig, Tone,
};

fn plain_config() -> EngineConfig {
    EngineConfig {
        style: StyleConfig {
            greeting: None,
            sign_off: None,
            emoji: false,
            tone: Tone::Neutral,
        },
        ..EngineConfig::default()
    }
}

fn build_engine(
    inference: Arc<dyn LanguageInference>,
    retrieval: Arc<dyn DataRetrieval>,
    audit: Arc<MemoryAuditSink>,
    config: EngineConfig,
) -> Engine {
    Engine::builder()
        .inference(inference)
        .retrieval(retrieval)
        .audit(audit)
        .config(config)
        .credentials(Credentials::new("test-token"))
        .build()
        .expect("engine builds")
}

fn inbound(message: &str, channel: &str) -> InboundMessage {
    InboundMessage {
        user_id: "u-42".into(),
        message: message.into(),
        channel: channel.into(),
        conversation_id: "conv-1".into(),
        display_name: None,
        timezone: Some("UTC".into()),
        user_context: HashMap::new(),
    }
}

// Scenario A: data retrieved, draft passes validation first time.
#[tokio::test]
async fn scenario_a_happy_path_on_sms() {
    let audit = Arc::new(MemoryAuditSink::new());
    let inference = ScriptedInference {
        criteria: vec![
            ("c1", "mentions the hours logged", "32"),
            ("c2", "mentions the weekly target", "40"),
            ("c3", "no markup on the sms channel", "not:<b>"),
        ],
        ..ScriptedInference::default()
    };
    let engine = build_engine(
        Arc::new(inference),
        Arc::new(StaticRetrieval::hours(32.0, 40.0)),
        audit.clone(),
        plain_config(),
    );

    let reply = engine
        .handle(inbound("Check my timesheet", "sms"))
        .await
        .expect("accepted");

    assert!(reply.validation_passed);
    assert!(!reply.refinement_attempted);
    assert!(!reply.graceful_failure);
    let content = &reply.final_response.content;
    assert!(content.contains("32"), "draft should cite logged hours: {content}");
    assert!(content.contains("40"), "draft should cite target hours: {content}");
    assert!(content.chars().count() <= 1600);
    assert!(!reply.final_response.is_split);

    let stages: Vec<StageName> = audit.interactions().iter().map(|r| r.stage).collect();
    assert_eq!(
        stages,
        vec![
            StageName::Planning,
            StageName::Retrieval,
            StageName::Composition,
            StageName::Formatting,
            StageName::Validation,
        ]
    );
    assert!(audit.failures().is_empty());
}

// Scenario B: first draft carries disallowed markup; one refinement fixes it.
#[tokio::test]
async fn scenario_b_refinement_recovers() {
    let audit = Arc::new(MemoryAuditSink::new());
    let inference = ScriptedInference {
        compose: ComposeBehavior::WithMarkup,
        criteria: vec![
            ("c1", "mentions the hours logged", "32"),
            ("c2", "no markup on the sms channel", "not:<b>"),
        ],
        ..ScriptedInference::default()
    };
    let engine = build_engine(
        Arc::new(inference),
        Arc::new(StaticRetrieval::hours(32.0, 40.0)),
        audit.clone(),
        plain_config(),
    );

    let reply = engine
        .handle(inbound("Check my timesheet", "sms"))
        .await
        .expect("accepted");

    assert!(reply.validation_passed);
    assert!(reply.refinement_attempted);
    assert!(!reply.graceful_failure);
    assert!(!reply.final_response.content.contains("<b>"));
    assert!(reply.final_response.content.contains("32"));

    let refinements = audit
        .interactions()
        .iter()
        .filter(|r| r.stage == StageName::Refinement)
        .count();
    assert_eq!(refinements, 1);
    assert!(audit.failures().is_empty());
}

// Scenario C: validation cannot be satisfied; the failure composer takes over.
#[tokio::test]
async fn scenario_c_graceful_failure_after_refinement() {
    let audit = Arc::new(MemoryAuditSink::new());
    let inference = ScriptedInference {
        criteria: vec![("c1", "mentions unicorns explicitly", "unicorn")],
        ..ScriptedInference::default()
    };
    let engine = build_engine(
        Arc::new(inference),
        Arc::new(StaticRetrieval::hours(32.0, 40.0)),
        audit.clone(),
        plain_config(),
    );

    let reply = engine
        .handle(inbound("Check my timesheet", "sms"))
        .await
        .expect("accepted");

    assert!(reply.graceful_failure);
    assert!(!reply.validation_passed);
    assert!(reply.refinement_attempted);
    assert!(!reply.final_response.content.is_empty());
    // The apology never leaks the criterion text
    assert!(!reply.final_response.content.contains("unicorn"));

    // The refinement bound: exactly one refinement even though validation
    // failed twice.
    let refinements = audit
        .interactions()
        .iter()
        .filter(|r| r.stage == StageName::Refinement)
        .count();
    assert_eq!(refinements, 1);

    let failures = audit.failures();
    assert_eq!(failures.len(), 1);
    let failure = &failures[0];
    assert!(failure.refinement_attempted);
    assert!(!failure.refinement_succeeded);
    assert_eq!(failure.root_cause, "validation_unsatisfied");
    let scorecard = failure.scorecard.as_ref().expect("scorecard snapshot");
    assert_eq!(scorecard.failed_criterion_ids(), vec!["c1".to_string()]);
}

// Scenario D: retrieval reports DataUnavailable; the pipeline still
// completes with an apologetic draft and no refinement.
#[tokio::test]
async fn scenario_d_data_unavailable_degrades_gracefully() {
    let audit = Arc::new(MemoryAuditSink::new());
    let inference = ScriptedInference {
        criteria: vec![("c1", "apologizes for the missing data", "couldn't fetch")],
        ..ScriptedInference::default()
    };
    let engine = build_engine(
        Arc::new(inference),
        Arc::new(StaticRetrieval::unavailable("backend maintenance window")),
        audit.clone(),
        plain_config(),
    );

    let reply = engine
        .handle(inbound("Check my timesheet", "sms"))
        .await
        .expect("accepted");

    assert!(reply.validation_passed);
    assert!(!reply.refinement_attempted);
    assert!(!reply.graceful_failure);
    assert!(reply.final_response.content.contains("couldn't fetch"));

    let retrieval_record = audit
        .interactions()
        .into_iter()
        .find(|r| r.stage == StageName::Retrieval)
        .expect("retrieval was attempted");
    assert!(!retrieval_record.success);
    assert!(retrieval_record
        .error
        .as_deref()
        .unwrap()
        .contains("maintenance"));
}

// Scenario E: malformed inbound input is rejected before any workflow runs.
#[tokio::test]
async fn scenario_e_invalid_input_rejected_up_front() {
    let audit = Arc::new(MemoryAuditSink::new());
    let engine = build_engine(
        Arc::new(ScriptedInference::default()),
        Arc::new(StaticRetrieval::hours(32.0, 40.0)),
        audit.clone(),
        plain_config(),
    );

    let err = engine
        .handle(inbound("Check my timesheet", "pager"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_input");

    let err = engine.handle(inbound("   ", "sms")).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_input");

    // No workflow, no audit trail
    assert!(audit.interactions().is_empty());
    assert!(audit.failures().is_empty());
}

// A planning timeout routes to graceful failure instead of hanging.
#[tokio::test]
async fn planning_timeout_routes_to_graceful_failure() {
    let audit = Arc::new(MemoryAuditSink::new());
    let inference = ScriptedInference {
        plan_delay: Some(Duration::from_millis(200)),
        ..ScriptedInference::default()
    };
    let config = EngineConfig {
        timeouts: TimeoutConfig {
            planning_ms: 5,
            ..TimeoutConfig::default()
        },
        ..plain_config()
    };
    let engine = build_engine(
        Arc::new(inference),
        Arc::new(StaticRetrieval::hours(32.0, 40.0)),
        audit.clone(),
        config,
    );

    let reply = engine
        .handle(inbound("Check my timesheet", "sms"))
        .await
        .expect("accepted");

    assert!(reply.graceful_failure);
    assert!(!reply.validation_passed);
    assert!(!reply.refinement_attempted);
    assert!(!reply.final_response.content.is_empty());

    let planning_record = audit
        .interactions()
        .into_iter()
        .find(|r| r.stage == StageName::Planning)
        .expect("planning attempted");
    assert!(!planning_record.success);
    assert!(planning_record.error.unwrap().contains("timed out"));

    let failures = audit.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].root_cause, "inference_timeout");
    assert!(failures[0].scorecard.is_none());
}

// A broken judge fails closed: criteria are marked failed, never skipped.
#[tokio::test]
async fn broken_judge_fails_closed_into_graceful_failure() {
    let audit = Arc::new(MemoryAuditSink::new());
    let inference = BrokenJudgeInference {
        inner: ScriptedInference::default(),
    };
    let engine = build_engine(
        Arc::new(inference),
        Arc::new(StaticRetrieval::hours(32.0, 40.0)),
        audit.clone(),
        plain_config(),
    );

    let reply = engine
        .handle(inbound("Check my timesheet", "sms"))
        .await
        .expect("accepted");

    assert!(reply.graceful_failure);
    assert!(!reply.validation_passed);

    let failure = &audit.failures()[0];
    let scorecard = failure.scorecard.as_ref().expect("scorecard snapshot");
    for criterion in scorecard.criteria() {
        assert_eq!(criterion.passed, Some(false));
        assert!(criterion
            .feedback
            .as_deref()
            .unwrap()
            .contains("could not be judged"));
    }
}

// Long content on a limited channel splits into bounded, numbered parts.
#[tokio::test]
async fn long_answer_splits_for_sms() {
    let audit = Arc::new(MemoryAuditSink::new());
    let inference = ScriptedInference {
        needs_data: false,
        compose: ComposeBehavior::LongText(60),
        criteria: vec![("c1", "carries the numbered sentences", "sentence number")],
        ..ScriptedInference::default()
    };
    let engine = build_engine(
        Arc::new(inference),
        Arc::new(StaticRetrieval::hours(0.0, 0.0)),
        audit.clone(),
        plain_config(),
    );

    let reply = engine
        .handle(inbound("Tell me everything about my timesheets", "sms"))
        .await
        .expect("accepted");

    assert!(reply.validation_passed);
    let payload = &reply.final_response;
    assert!(payload.is_split);
    assert!(payload.parts.len() >= 2);
    let total = payload.parts.len();
    for (index, part) in payload.parts.iter().enumerate() {
        assert!(part.content.chars().count() <= 1600);
        assert_eq!(part.sequence as usize, index + 1);
        assert_eq!(
            part.continuation.as_deref(),
            Some(format!("({}/{})", index + 1, total).as_str())
        );
    }
    assert_eq!(payload.reassembled(), payload.content);
}

// Completed requests thread their turns into conversation history.
#[tokio::test]
async fn history_records_user_and_assistant_turns() {
    let audit = Arc::new(MemoryAuditSink::new());
    let history = Arc::new(InMemoryHistoryStore::new(10));
    let engine = Engine::builder()
        .inference(Arc::new(ScriptedInference::default()))
        .retrieval(Arc::new(StaticRetrieval::hours(32.0, 40.0)))
        .audit(audit)
        .history(history.clone())
        .config(plain_config())
        .build()
        .expect("engine builds");

    engine
        .handle(inbound("Check my timesheet", "sms"))
        .await
        .expect("accepted");

    let turns = history.recent("conv-1", 10);
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "Check my timesheet");
    assert!(turns[1].content.contains("32"));
}

// A serialized mid-flight workflow resumes from its recorded status and
// still terminates with a final response.
#[tokio::test]
async fn workflow_resumes_from_snapshot() {
    let inference: Arc<dyn LanguageInference> = Arc::new(ScriptedInference::default());
    let retrieval: Arc<dyn DataRetrieval> = Arc::new(StaticRetrieval::hours(32.0, 40.0));
    let audit = Arc::new(MemoryAuditSink::new());
    let timeouts = TimeoutConfig::default();
    let style = plain_config().style;

    let coordinator = RequestCoordinator::new(
        PlanningStage::new(inference.clone(), timeouts.planning()),
        RetrievalStage::new(retrieval, timeouts.retrieval()),
        CompositionStage::new(inference.clone(), timeouts.composition()),
        FormattingStage::new(),
        ValidationStage::new(inference.clone(), timeouts.judge()),
        FailureComposer::new(inference, timeouts.failure()),
        Arc::new(ChannelPolicyTable::builtin()),
        style,
        audit,
    );

    let ctx = RequestContext {
        credentials: Credentials::new("test-token"),
        timezone: "UTC".into(),
        display_name: None,
        history: Vec::new(),
        user_context: HashMap::new(),
    };

    let mut state = WorkflowState::new(
        uuid::Uuid::new_v4(),
        "u-42",
        "conv-1",
        Channel::Sms,
        "Check my timesheet",
    );

    // Advance through planning, then pretend the process died
    coordinator.step(&mut state, &ctx).await; // Created -> Planning
    coordinator.step(&mut state, &ctx).await; // Planning -> Retrieving
    assert_eq!(state.status, WorkflowStatus::Retrieving);

    let snapshot = serde_json::to_string(&state).expect("snapshot serializes");
    let mut restored: WorkflowState = serde_json::from_str(&snapshot).expect("snapshot restores");

    coordinator.run(&mut restored, &ctx).await;
    assert_eq!(restored.status, WorkflowStatus::Completed);
    let response = restored.final_response.expect("final response present");
    assert!(response.content.contains("32"));
    assert!(!restored.graceful_failure);
}
