//! HTTP timesheet backend client
//!
//! Production implementation of the retrieval port against the timesheet
//! REST API. Every transport, status or decode problem is folded into
//! `DataUnavailable`; the pipeline decides what to tell the user.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Credentials, DataBundle, DataRetrieval, DataUnavailable, TimesheetQuery};

/// Default request timeout for the timesheet backend
const DEFAULT_TIMEOUT_SECS: u64 = 8;

#[derive(Clone)]
pub struct HttpTimesheetClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTimesheetClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, DataUnavailable> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DataUnavailable::new(format!("http client init failed: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Base URL from `TIMESHEET_API_URL`.
    pub fn from_env() -> Result<Self, DataUnavailable> {
        let base_url = std::env::var("TIMESHEET_API_URL")
            .map_err(|_| DataUnavailable::new("TIMESHEET_API_URL environment variable not set"))?;
        Self::new(base_url)
    }

    fn endpoint(&self, query: &TimesheetQuery) -> (String, Vec<(String, String)>) {
        match query {
            TimesheetQuery::HoursSummary { period } => (
                format!("{}/v1/hours/summary", self.base_url),
                vec![("period".to_string(), period.as_str().to_string())],
            ),
            TimesheetQuery::RecentEntries { limit } => (
                format!("{}/v1/entries", self.base_url),
                vec![("limit".to_string(), limit.to_string())],
            ),
            TimesheetQuery::MissingDays { period } => (
                format!("{}/v1/entries/missing", self.base_url),
                vec![("period".to_string(), period.as_str().to_string())],
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HoursSummaryDto {
    hours_logged: f64,
    hours_target: f64,
    #[serde(default)]
    period_label: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntryDto {
    date: String,
    hours: f64,
    #[serde(default)]
    project: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EntriesDto {
    entries: Vec<EntryDto>,
}

#[derive(Debug, Deserialize)]
struct MissingDaysDto {
    days: Vec<String>,
}

/// Render retrieved facts into the plain-text form composition prompts use.
fn render_summary(query: &TimesheetQuery, facts: &serde_json::Value) -> Result<String, DataUnavailable> {
    match query {
        TimesheetQuery::HoursSummary { period } => {
            let dto: HoursSummaryDto = serde_json::from_value(facts.clone())
                .map_err(|e| DataUnavailable::new(format!("unexpected summary payload: {e}")))?;
            let label = dto
                .period_label
                .unwrap_or_else(|| period.as_str().replace('_', " "));
            Ok(format!(
                "{:.1} of {:.1} hours logged for the {label}",
                dto.hours_logged, dto.hours_target
            ))
        }
        TimesheetQuery::RecentEntries { .. } => {
            let dto: EntriesDto = serde_json::from_value(facts.clone())
                .map_err(|e| DataUnavailable::new(format!("unexpected entries payload: {e}")))?;
            if dto.entries.is_empty() {
                return Ok("no recent timesheet entries".to_string());
            }
            let lines: Vec<String> = dto
                .entries
                .iter()
                .map(|e| match &e.project {
                    Some(project) => format!("{}: {:.1}h on {project}", e.date, e.hours),
                    None => format!("{}: {:.1}h", e.date, e.hours),
                })
                .collect();
            Ok(lines.join("; "))
        }
        TimesheetQuery::MissingDays { period } => {
            let dto: MissingDaysDto = serde_json::from_value(facts.clone())
                .map_err(|e| DataUnavailable::new(format!("unexpected missing-days payload: {e}")))?;
            if dto.days.is_empty() {
                Ok(format!(
                    "no missing days in the {}",
                    period.as_str().replace('_', " ")
                ))
            } else {
                Ok(format!("days without entries: {}", dto.days.join(", ")))
            }
        }
    }
}

#[async_trait]
impl DataRetrieval for HttpTimesheetClient {
    async fn retrieve(
        &self,
        query: &TimesheetQuery,
        credentials: &Credentials,
        timezone: &str,
    ) -> Result<DataBundle, DataUnavailable> {
        let (url, mut params) = self.endpoint(query);
        params.push(("timezone".to_string(), timezone.to_string()));
        debug!(%url, "fetching timesheet data");

        let response = self
            .client
            .get(&url)
            .bearer_auth(credentials.token())
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                warn!(%url, error = %e, "timesheet request failed");
                DataUnavailable::new(format!("timesheet backend unreachable: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(%url, %status, "timesheet backend returned error status");
            return Err(DataUnavailable::new(format!(
                "timesheet backend returned {status}"
            )));
        }

        let facts: serde_json::Value = response
            .json()
            .await
            .map_err(|e| DataUnavailable::new(format!("timesheet response decode failed: {e}")))?;

        let summary = render_summary(query, &facts)?;
        Ok(DataBundle {
            query: query.clone(),
            facts,
            summary,
            retrieved_at: Utc::now(),
        })
    }
}
