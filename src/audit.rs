//! Append-only audit trail
//!
//! The coordinator emits one `InteractionRecord` after every stage
//! invocation and one `FailureRecord` per terminally-failing request.
//! Records are write-once values handed to an `AuditSink`; business logic
//! never reads them back.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{Scorecard, StageName};

/// Maximum characters kept in a sanitized summary
const SUMMARY_LIMIT: usize = 200;

/// Collapse whitespace and truncate so summaries stay log-line sized.
pub fn summarize(text: &str) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SUMMARY_LIMIT {
        collapsed
    } else {
        let truncated: String = collapsed.chars().take(SUMMARY_LIMIT).collect();
        format!("{truncated}…")
    }
}

/// Audit entry for one stage invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub request_id: Uuid,
    pub stage: StageName,
    pub action: String,
    pub input_summary: String,
    pub output_summary: String,
    pub duration_ms: u64,
    pub success: bool,
    /// Present iff !success
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl InteractionRecord {
    pub fn success(
        request_id: Uuid,
        stage: StageName,
        action: impl Into<String>,
        input: &str,
        output: &str,
        duration_ms: u64,
    ) -> Self {
        Self {
            request_id,
            stage,
            action: action.into(),
            input_summary: summarize(input),
            output_summary: summarize(output),
            duration_ms,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(
        request_id: Uuid,
        stage: StageName,
        action: impl Into<String>,
        input: &str,
        error: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            request_id,
            stage,
            action: action.into(),
            input_summary: summarize(input),
            output_summary: String::new(),
            duration_ms,
            success: false,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Post-mortem record for a request whose validation could not be satisfied
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub request_id: Uuid,
    pub question: String,
    /// Final scorecard; absent when the failure predates planning
    pub scorecard: Option<Scorecard>,
    pub refinement_attempted: bool,
    pub refinement_succeeded: bool,
    pub message_sent: String,
    pub root_cause: String,
    pub timestamp: DateTime<Utc>,
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    fn record_interaction(&self, record: InteractionRecord);
    fn record_failure(&self, record: FailureRecord);
}

/// Sink that forwards records to the tracing subscriber as structured events
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_interaction(&self, record: InteractionRecord) {
        if record.success {
            info!(
                request_id = %record.request_id,
                stage = %record.stage,
                action = %record.action,
                duration_ms = record.duration_ms,
                output = %record.output_summary,
                "stage completed"
            );
        } else {
            warn!(
                request_id = %record.request_id,
                stage = %record.stage,
                action = %record.action,
                duration_ms = record.duration_ms,
                error = record.error.as_deref().unwrap_or(""),
                "stage failed"
            );
        }
    }

    fn record_failure(&self, record: FailureRecord) {
        warn!(
            request_id = %record.request_id,
            refinement_attempted = record.refinement_attempted,
            root_cause = %record.root_cause,
            "request completed via graceful failure"
        );
    }
}

/// In-memory sink for tests and the CLI harness
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    interactions: Mutex<Vec<InteractionRecord>>,
    failures: Mutex<Vec<FailureRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interactions(&self) -> Vec<InteractionRecord> {
        self.interactions.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.failures.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_interaction(&self, record: InteractionRecord) {
        if let Ok(mut guard) = self.interactions.lock() {
            guard.push(record);
        }
    }

    fn record_failure(&self, record: FailureRecord) {
        if let Ok(mut guard) = self.failures.lock() {
            guard.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Criterion;

    #[test]
    fn test_summarize_collapses_and_truncates() {
        assert_eq!(summarize("a  b\n\nc"), "a b c");
        let long = "x".repeat(500);
        let summary = summarize(&long);
        assert!(summary.chars().count() <= SUMMARY_LIMIT + 1);
        assert!(summary.ends_with('…'));
    }

    #[test]
    fn test_memory_sink_accumulates() {
        let sink = MemoryAuditSink::new();
        let id = Uuid::new_v4();
        sink.record_interaction(InteractionRecord::success(
            id,
            StageName::Planning,
            "plan",
            "check my hours",
            "2 steps",
            12,
        ));
        sink.record_interaction(InteractionRecord::failure(
            id,
            StageName::Validation,
            "judge",
            "payload",
            "judge unreachable",
            40,
        ));
        let records = sink.interactions();
        assert_eq!(records.len(), 2);
        assert!(records[0].success);
        assert!(records[0].error.is_none());
        assert!(!records[1].success);
        assert_eq!(records[1].error.as_deref(), Some("judge unreachable"));
    }

    #[test]
    fn test_failure_record_snapshot() {
        let sink = MemoryAuditSink::new();
        let id = Uuid::new_v4();
        let scorecard = Scorecard::new(
            id,
            vec![Criterion::new("c1", "mentions logged hours", "the reply cites hours")],
        )
        .unwrap();
        sink.record_failure(FailureRecord {
            request_id: id,
            question: "check my timesheet".into(),
            scorecard: Some(scorecard),
            refinement_attempted: true,
            refinement_succeeded: false,
            message_sent: "Sorry, I could not help this time.".into(),
            root_cause: "validation_unsatisfied".into(),
            timestamp: Utc::now(),
        });
        assert_eq!(sink.failures().len(), 1);
    }
}
