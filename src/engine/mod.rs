//! The quality-gated response engine
//!
//! One inbound message in, one validated (or gracefully failing) response
//! out. The [`Engine`] is the front door: it rejects malformed input
//! before any workflow exists, then hands a fresh [`WorkflowState`] to the
//! [`RequestCoordinator`], which sequences planning, retrieval,
//! composition, formatting, validation, the single permitted refinement,
//! and the failure composer.
//!
//! Requests are isolated: each gets its own state, and the engine itself
//! is `Send + Sync`, so many requests run concurrently against shared
//! immutable policy and style tables.

pub mod composition;
pub mod coordinator;
pub mod failure;
pub mod formatting;
pub mod planning;
pub mod retrieval;
pub mod state;
pub mod validation;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditSink, TracingAuditSink};
use crate::channel::ChannelPolicyTable;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::history::{ConversationTurn, HistoryStore, InMemoryHistoryStore};
use crate::inference::LanguageInference;
use crate::model::FormattedPayload;
use crate::retrieval::{Credentials, DataRetrieval};

pub use composition::CompositionStage;
pub use coordinator::{RequestContext, RequestCoordinator};
pub use failure::{FailureComposer, FailureMessage, FALLBACK_FAILURE_MESSAGE};
pub use formatting::FormattingStage;
pub use planning::{validate_input, PlanningStage};
pub use retrieval::RetrievalStage;
pub use state::{FailureReason, ValidationPass, WorkflowState, WorkflowStatus};
pub use validation::ValidationStage;

/// Wrap a port call in its per-stage budget, converting elapsed time into
/// the typed timeout error.
pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    budget: Duration,
    fut: F,
) -> EngineResult<T>
where
    F: Future<Output = EngineResult<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::InferenceTimeout {
            operation,
            timeout_ms: budget.as_millis() as u64,
        }),
    }
}

/// One inbound user message, as the transport hands it over
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    pub user_id: String,
    pub message: String,
    pub channel: String,
    pub conversation_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub user_context: HashMap<String, String>,
}

/// The engine's answer for one accepted request
#[derive(Debug, Clone, Serialize)]
pub struct EngineReply {
    pub request_id: Uuid,
    pub final_response: FormattedPayload,
    pub validation_passed: bool,
    pub refinement_attempted: bool,
    pub graceful_failure: bool,
    pub total_duration_ms: u64,
}

/// Top-level handle wiring the coordinator to its collaborators
pub struct Engine {
    coordinator: RequestCoordinator,
    policies: Arc<ChannelPolicyTable>,
    history: Arc<dyn HistoryStore>,
    config: EngineConfig,
    credentials: Credentials,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Process one inbound message end to end.
    ///
    /// Only `InvalidInput` is ever returned; every other condition resolves
    /// into the reply's `graceful_failure` path.
    pub async fn handle(&self, inbound: InboundMessage) -> EngineResult<EngineReply> {
        let started = Instant::now();
        let channel = validate_input(&inbound.message, &inbound.channel, &self.policies)?;

        let request_id = Uuid::new_v4();
        info!(%request_id, %channel, user_id = %inbound.user_id, "request accepted");

        let mut workflow = WorkflowState::new(
            request_id,
            &inbound.user_id,
            &inbound.conversation_id,
            channel,
            &inbound.message,
        );
        let ctx = RequestContext {
            credentials: self.credentials.clone(),
            timezone: inbound
                .timezone
                .clone()
                .unwrap_or_else(|| self.config.default_timezone.clone()),
            display_name: inbound.display_name.clone(),
            history: self
                .history
                .recent(&inbound.conversation_id, self.config.history_limit),
            user_context: inbound.user_context.clone(),
        };

        self.coordinator.run(&mut workflow, &ctx).await;

        self.history
            .append(&inbound.conversation_id, ConversationTurn::user(&inbound.message));
        if let Some(response) = &workflow.final_response {
            self.history.append(
                &inbound.conversation_id,
                ConversationTurn::assistant(&response.content),
            );
        }

        Ok(reply_from(workflow, started))
    }

    /// Continue a workflow snapshot from its last recorded status, e.g.
    /// after a restart. Stages already completed are not re-run; the
    /// retrieval port is shielded by request-id de-duplication either way.
    pub async fn resume(&self, mut workflow: WorkflowState) -> EngineReply {
        let started = Instant::now();
        info!(request_id = %workflow.request_id, status = %workflow.status, "resuming workflow");
        let ctx = RequestContext {
            credentials: self.credentials.clone(),
            timezone: self.config.default_timezone.clone(),
            display_name: None,
            history: self
                .history
                .recent(&workflow.conversation_id, self.config.history_limit),
            user_context: HashMap::new(),
        };
        self.coordinator.run(&mut workflow, &ctx).await;
        reply_from(workflow, started)
    }

    pub fn policies(&self) -> &ChannelPolicyTable {
        &self.policies
    }
}

fn reply_from(workflow: WorkflowState, started: Instant) -> EngineReply {
    let validation_passed = workflow
        .validation
        .as_ref()
        .map(|v| v.passed)
        .unwrap_or(false);
    let final_response = workflow.final_response.unwrap_or_else(|| {
        // Unreachable by construction; the guarantee of a reply holds anyway
        FormattedPayload::single(workflow.channel, FALLBACK_FAILURE_MESSAGE)
    });
    EngineReply {
        request_id: workflow.request_id,
        final_response,
        validation_passed,
        refinement_attempted: workflow.refinement_count > 0,
        graceful_failure: workflow.graceful_failure,
        total_duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Builder for [`Engine`]
pub struct EngineBuilder {
    inference: Option<Arc<dyn LanguageInference>>,
    retrieval: Option<Arc<dyn DataRetrieval>>,
    policies: ChannelPolicyTable,
    config: EngineConfig,
    audit: Option<Arc<dyn AuditSink>>,
    history: Option<Arc<dyn HistoryStore>>,
    credentials: Option<Credentials>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            inference: None,
            retrieval: None,
            policies: ChannelPolicyTable::builtin(),
            config: EngineConfig::default(),
            audit: None,
            history: None,
            credentials: None,
        }
    }

    pub fn inference(mut self, inference: Arc<dyn LanguageInference>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn retrieval(mut self, retrieval: Arc<dyn DataRetrieval>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    pub fn policies(mut self, policies: ChannelPolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn build(self) -> EngineResult<Engine> {
        let inference = self
            .inference
            .ok_or_else(|| EngineError::Config("language inference port not set".into()))?;
        let retrieval = self
            .retrieval
            .ok_or_else(|| EngineError::Config("data retrieval port not set".into()))?;
        let audit: Arc<dyn AuditSink> = self.audit.unwrap_or_else(|| Arc::new(TracingAuditSink));
        let history: Arc<dyn HistoryStore> = self
            .history
            .unwrap_or_else(|| Arc::new(InMemoryHistoryStore::new(self.config.history_limit.max(1) * 2)));
        let policies = Arc::new(self.policies);
        let timeouts = &self.config.timeouts;

        let coordinator = RequestCoordinator::new(
            PlanningStage::new(inference.clone(), timeouts.planning()),
            RetrievalStage::new(retrieval, timeouts.retrieval()),
            CompositionStage::new(inference.clone(), timeouts.composition()),
            FormattingStage::new(),
            ValidationStage::new(inference.clone(), timeouts.judge()),
            FailureComposer::new(inference, timeouts.failure()),
            policies.clone(),
            self.config.style.clone(),
            audit,
        );

        Ok(Engine {
            coordinator,
            policies,
            history,
            config: self.config,
            credentials: self.credentials.unwrap_or_else(|| Credentials::new("")),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
