//! Concierge harness
//!
//! Debug CLI: push a single message through the full pipeline with the
//! configured LLM backend and timesheet API, then print the reply and the
//! audit trail.
//!
//! ```text
//! cargo run --features cli --bin concierge_harness -- \
//!     --message "Check my timesheet" --channel sms
//! ```

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ts_concierge::audit::MemoryAuditSink;
use ts_concierge::engine::{Engine, InboundMessage};
use ts_concierge::inference::{create_llm_client_from_env, LlmInference};
use ts_concierge::retrieval::{Credentials, HttpTimesheetClient};
use ts_concierge::EngineConfig;

#[derive(Parser, Debug)]
#[command(name = "concierge_harness", about = "Run one message through the engine")]
struct Args {
    /// The user message to process
    #[arg(long)]
    message: String,

    /// Delivery channel (sms, slack, teams, email, web)
    #[arg(long, default_value = "web")]
    channel: String,

    /// User id presented to the engine
    #[arg(long, default_value = "harness-user")]
    user: String,

    /// Conversation id for history threading
    #[arg(long, default_value = "harness-conversation")]
    conversation: String,

    /// Optional display name for greetings
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();

    let llm = create_llm_client_from_env().context("LLM backend configuration")?;
    let inference = Arc::new(LlmInference::new(llm));
    let timesheet = HttpTimesheetClient::from_env()
        .map_err(|e| anyhow!("timesheet backend configuration: {e}"))?;
    let credentials =
        Credentials::new(std::env::var("TIMESHEET_API_TOKEN").unwrap_or_default());

    let audit = Arc::new(MemoryAuditSink::new());
    let engine = Engine::builder()
        .inference(inference)
        .retrieval(Arc::new(timesheet))
        .credentials(credentials)
        .config(EngineConfig::from_env())
        .audit(audit.clone())
        .build()
        .map_err(|e| anyhow!("engine construction: {e}"))?;

    let reply = engine
        .handle(InboundMessage {
            user_id: args.user,
            message: args.message,
            channel: args.channel,
            conversation_id: args.conversation,
            display_name: args.name,
            timezone: None,
            user_context: Default::default(),
        })
        .await?;

    println!("request id:           {}", reply.request_id);
    println!("validation passed:    {}", reply.validation_passed);
    println!("refinement attempted: {}", reply.refinement_attempted);
    println!("graceful failure:     {}", reply.graceful_failure);
    println!("duration:             {}ms", reply.total_duration_ms);
    println!("\n--- response ---\n{}", reply.final_response.content);
    if reply.final_response.is_split {
        println!("\n--- delivery parts ---");
        for part in &reply.final_response.parts {
            println!("[{}] {}", part.sequence, part.content);
        }
    }

    println!("\n--- audit trail ---");
    for record in audit.interactions() {
        println!(
            "{:>11} {:<16} {:>6}ms success={} {}",
            record.stage.to_string(),
            record.action,
            record.duration_ms,
            record.success,
            record.error.unwrap_or_default()
        );
    }
    for failure in audit.failures() {
        println!(
            "FAILURE root_cause={} refinement_attempted={}",
            failure.root_cause, failure.refinement_attempted
        );
    }

    Ok(())
}
