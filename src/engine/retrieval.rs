//! Retrieval stage
//!
//! Runs only when the plan needs data. Every failure, including timeout,
//! becomes a typed `DataUnavailable` the pipeline carries forward as
//! context; composition still produces an answer.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{ExecutionPlan, StageName};
use crate::retrieval::{
    Credentials, DataBundle, DataRetrieval, DataUnavailable, DedupingRetrieval, TimesheetQuery,
};

pub struct RetrievalStage {
    retrieval: DedupingRetrieval,
    timeout: Duration,
}

impl RetrievalStage {
    pub fn new(port: Arc<dyn DataRetrieval>, timeout: Duration) -> Self {
        Self {
            retrieval: DedupingRetrieval::new(port),
            timeout,
        }
    }

    /// Decode the typed query from the plan's retrieval step, defaulting
    /// to an hours summary when the parameters don't parse.
    pub fn query_from_plan(plan: &ExecutionPlan) -> TimesheetQuery {
        plan.step_for(StageName::Retrieval)
            .and_then(|step| {
                serde_json::from_value::<TimesheetQuery>(step.parameters.clone())
                    .map_err(|e| {
                        debug!(error = %e, "retrieval step parameters not a typed query");
                        e
                    })
                    .ok()
            })
            .unwrap_or_default()
    }

    pub async fn run(
        &self,
        request_id: Uuid,
        plan: &ExecutionPlan,
        credentials: &Credentials,
        timezone: &str,
    ) -> Result<DataBundle, DataUnavailable> {
        let query = Self::query_from_plan(plan);
        debug!(%request_id, ?query, "retrieving timesheet data");

        let attempt = tokio::time::timeout(
            self.timeout,
            self.retrieval
                .retrieve_once(request_id, &query, credentials, timezone),
        )
        .await;

        match attempt {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(%request_id, timeout_ms = self.timeout.as_millis() as u64, "retrieval timed out");
                Err(DataUnavailable::new(format!(
                    "retrieval timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Release the per-request dedup entry once the request finishes.
    pub async fn finish(&self, request_id: Uuid) {
        self.retrieval.forget(request_id).await;
    }
}
