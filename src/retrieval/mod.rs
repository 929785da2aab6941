//! Data Retrieval Port
//!
//! Typed timesheet queries and the port the retrieval stage calls. The
//! contract is deliberately tame: implementations never raise unstructured
//! errors. Every failure becomes a `DataUnavailable`, which downstream
//! stages treat as retrievable context, not a fatal condition.

pub mod http_client;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

pub use http_client::HttpTimesheetClient;

/// Reporting period a query targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimesheetPeriod {
    CurrentWeek,
    PreviousWeek,
    CurrentMonth,
}

impl Default for TimesheetPeriod {
    fn default() -> Self {
        TimesheetPeriod::CurrentWeek
    }
}

impl TimesheetPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimesheetPeriod::CurrentWeek => "current_week",
            TimesheetPeriod::PreviousWeek => "previous_week",
            TimesheetPeriod::CurrentMonth => "current_month",
        }
    }
}

fn default_entry_limit() -> usize {
    10
}

/// The catalog of retrieval operations the planner can target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum TimesheetQuery {
    /// Hours logged versus target for a period
    HoursSummary {
        #[serde(default)]
        period: TimesheetPeriod,
    },
    /// Latest individual entries
    RecentEntries {
        #[serde(default = "default_entry_limit")]
        limit: usize,
    },
    /// Working days with no entry in a period
    MissingDays {
        #[serde(default)]
        period: TimesheetPeriod,
    },
}

impl Default for TimesheetQuery {
    fn default() -> Self {
        TimesheetQuery::HoursSummary {
            period: TimesheetPeriod::CurrentWeek,
        }
    }
}

/// Retrieved timesheet facts plus a plain-text rendering for prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBundle {
    pub query: TimesheetQuery,
    pub facts: serde_json::Value,
    /// Human-readable rendering injected into composition prompts
    pub summary: String,
    pub retrieved_at: DateTime<Utc>,
}

/// Typed retrieval failure; composition continues without the data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataUnavailable {
    pub message: String,
}

impl DataUnavailable {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for DataUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "data unavailable: {}", self.message)
    }
}

/// Opaque caller credential; never logged, never serialized
#[derive(Clone)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(***)")
    }
}

/// Port for domain data retrieval
#[async_trait]
pub trait DataRetrieval: Send + Sync {
    /// One logical call per retrieval-stage invocation. Implementations
    /// convert every transport or decode failure into `DataUnavailable`.
    async fn retrieve(
        &self,
        query: &TimesheetQuery,
        credentials: &Credentials,
        timezone: &str,
    ) -> Result<DataBundle, DataUnavailable>;
}

/// Request-scoped de-duplication over a retrieval port.
///
/// Stage execution is at-least-once under resume, so a second retrieval for
/// the same request id returns the cached outcome instead of hitting the
/// port again.
pub struct DedupingRetrieval {
    inner: Arc<dyn DataRetrieval>,
    cache: Mutex<HashMap<Uuid, Result<DataBundle, DataUnavailable>>>,
}

impl DedupingRetrieval {
    pub fn new(inner: Arc<dyn DataRetrieval>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn retrieve_once(
        &self,
        request_id: Uuid,
        query: &TimesheetQuery,
        credentials: &Credentials,
        timezone: &str,
    ) -> Result<DataBundle, DataUnavailable> {
        if let Some(cached) = self.cache.lock().await.get(&request_id) {
            return cached.clone();
        }
        // The lock is not held across the port call; stages within one
        // request run sequentially, so the same id cannot race itself.
        let outcome = self.inner.retrieve(query, credentials, timezone).await;
        self.cache
            .lock()
            .await
            .entry(request_id)
            .or_insert(outcome)
            .clone()
    }

    /// Drop the cached outcome once a request completes.
    pub async fn forget(&self, request_id: Uuid) {
        self.cache.lock().await.remove(&request_id);
    }
}
