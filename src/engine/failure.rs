//! Failure composer
//!
//! Produces the always-approved, user-safe apology when validation cannot
//! be satisfied or a stage broke down. This stage cannot fail the request:
//! if composing the message errors, a static fallback string goes out.
//! The message never exposes criterion text, stack traces or raw errors.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::channel::Channel;
use crate::inference::LanguageInference;

use super::state::FailureReason;
use super::with_timeout;

/// Sent when even the failure composition errors
pub const FALLBACK_FAILURE_MESSAGE: &str = "I'm sorry, I wasn't able to put together \
a reliable answer to that just now. Please try again in a moment, or rephrase \
your question.";

/// A failure message ready for delivery; `approved` is always true
#[derive(Debug, Clone)]
pub struct FailureMessage {
    pub text: String,
    pub approved: bool,
}

pub struct FailureComposer {
    inference: Arc<dyn LanguageInference>,
    timeout: Duration,
}

impl FailureComposer {
    pub fn new(inference: Arc<dyn LanguageInference>, timeout: Duration) -> Self {
        Self { inference, timeout }
    }

    pub async fn run(
        &self,
        question: &str,
        reason: FailureReason,
        channel: Channel,
    ) -> FailureMessage {
        let composed = with_timeout(
            "compose_failure",
            self.timeout,
            self.inference
                .compose_failure(question, reason.as_str(), channel),
        )
        .await;

        let text = match composed {
            Ok(message) if !message.trim().is_empty() => message.trim().to_string(),
            Ok(_) => {
                warn!("failure composer returned an empty message, using fallback");
                FALLBACK_FAILURE_MESSAGE.to_string()
            }
            Err(e) => {
                warn!(error = %e, "failure composition errored, using fallback");
                FALLBACK_FAILURE_MESSAGE.to_string()
            }
        };

        FailureMessage {
            text,
            approved: true,
        }
    }
}
