//! Webhook server binary
//!
//! Wires the engine to its production collaborators (LLM backend per
//! `AGENT_BACKEND`, timesheet HTTP API, built-in channel policies) and
//! serves the inbound webhook.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ts_concierge::api;
use ts_concierge::engine::Engine;
use ts_concierge::inference::{create_llm_client_from_env, LlmInference};
use ts_concierge::retrieval::{Credentials, HttpTimesheetClient};
use ts_concierge::{ChannelPolicyTable, EngineConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let llm = create_llm_client_from_env().context("LLM backend configuration")?;
    let inference = Arc::new(LlmInference::new(llm));

    let timesheet = HttpTimesheetClient::from_env()
        .map_err(|e| anyhow!("timesheet backend configuration: {e}"))?;
    let credentials = Credentials::new(
        std::env::var("TIMESHEET_API_TOKEN").context("TIMESHEET_API_TOKEN not set")?,
    );

    // Optional YAML overrides; the built-in tables apply otherwise
    let policies = match std::env::var("CONCIERGE_CHANNEL_POLICY_FILE") {
        Ok(path) => ChannelPolicyTable::load_from_file(path.as_ref())
            .map_err(|e| anyhow!("channel policy file: {e}"))?,
        Err(_) => ChannelPolicyTable::builtin(),
    };
    let config = match std::env::var("CONCIERGE_CONFIG_FILE") {
        Ok(path) => EngineConfig::load_from_file(path.as_ref())
            .map_err(|e| anyhow!("engine config file: {e}"))?,
        Err(_) => EngineConfig::from_env(),
    };

    let engine = Engine::builder()
        .inference(inference)
        .retrieval(Arc::new(timesheet))
        .credentials(credentials)
        .policies(policies)
        .config(config)
        .build()
        .map_err(|e| anyhow!("engine construction: {e}"))?;

    let bind = std::env::var("CONCIERGE_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "webhook server listening");

    axum::serve(listener, api::router(Arc::new(engine)))
        .await
        .context("server loop")?;
    Ok(())
}
