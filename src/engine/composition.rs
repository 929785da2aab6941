//! Composition stage
//!
//! Produces the channel-agnostic draft, on the initial pass from plan plus
//! retrieved data, on the refinement pass from the prior draft plus the
//! failed-criteria feedback. "No data" is not a failure here; the prompt
//! degrades to an apologetic draft. Whether refinement may run at all is
//! the coordinator's decision, not this stage's.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::EngineResult;
use crate::inference::{CompositionContext, LanguageInference, RefinementContext};
use crate::model::DraftResponse;

use super::with_timeout;

pub struct CompositionStage {
    inference: Arc<dyn LanguageInference>,
    timeout: Duration,
}

impl CompositionStage {
    pub fn new(inference: Arc<dyn LanguageInference>, timeout: Duration) -> Self {
        Self { inference, timeout }
    }

    pub async fn compose(&self, ctx: &CompositionContext) -> EngineResult<DraftResponse> {
        debug!(request_id = %ctx.request_id, has_data = ctx.data_summary.is_some(), "composing draft");
        with_timeout("compose", self.timeout, self.inference.compose(ctx)).await
    }

    pub async fn refine(&self, ctx: &RefinementContext) -> EngineResult<DraftResponse> {
        debug!(
            request_id = %ctx.request_id,
            failed_criteria = ctx.failed_criteria.len(),
            "refining draft"
        );
        with_timeout("refine", self.timeout, self.inference.refine(ctx)).await
    }
}
