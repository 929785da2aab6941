//! Engine configuration
//!
//! Style adornment and per-stage timeout budgets. Loaded once (from YAML
//! and/or environment variables) and passed into the engine by value; no
//! stage reads ambient global configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Tone the composer is asked to write in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Friendly,
    Neutral,
    Formal,
}

impl Default for Tone {
    fn default() -> Self {
        Tone::Friendly
    }
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Friendly => "friendly",
            Tone::Neutral => "neutral",
            Tone::Formal => "formal",
        }
    }
}

/// Style adornment applied by the formatting stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConfig {
    /// Greeting template; `{name}` expands to the user's display name
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub sign_off: Option<String>,
    /// Emoji decoration, applied only on channels that support it
    #[serde(default)]
    pub emoji: bool,
    #[serde(default)]
    pub tone: Tone,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            greeting: Some("Hi {name},".to_string()),
            sign_off: None,
            emoji: false,
            tone: Tone::Friendly,
        }
    }
}

impl StyleConfig {
    pub fn load_from_str(yaml: &str) -> EngineResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::Config(format!("style config parse error: {e}")))
    }

    pub fn load_from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::load_from_str(&content)
    }
}

fn default_planning_ms() -> u64 {
    15_000
}
fn default_retrieval_ms() -> u64 {
    8_000
}
fn default_composition_ms() -> u64 {
    20_000
}
fn default_formatting_ms() -> u64 {
    2_000
}
fn default_judge_ms() -> u64 {
    10_000
}
fn default_failure_ms() -> u64 {
    8_000
}

/// Per-stage timeout budgets in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_planning_ms")]
    pub planning_ms: u64,
    #[serde(default = "default_retrieval_ms")]
    pub retrieval_ms: u64,
    #[serde(default = "default_composition_ms")]
    pub composition_ms: u64,
    #[serde(default = "default_formatting_ms")]
    pub formatting_ms: u64,
    /// Budget per criterion judgement, not per validation pass
    #[serde(default = "default_judge_ms")]
    pub judge_ms: u64,
    #[serde(default = "default_failure_ms")]
    pub failure_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            planning_ms: default_planning_ms(),
            retrieval_ms: default_retrieval_ms(),
            composition_ms: default_composition_ms(),
            formatting_ms: default_formatting_ms(),
            judge_ms: default_judge_ms(),
            failure_ms: default_failure_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn planning(&self) -> Duration {
        Duration::from_millis(self.planning_ms)
    }
    pub fn retrieval(&self) -> Duration {
        Duration::from_millis(self.retrieval_ms)
    }
    pub fn composition(&self) -> Duration {
        Duration::from_millis(self.composition_ms)
    }
    pub fn formatting(&self) -> Duration {
        Duration::from_millis(self.formatting_ms)
    }
    pub fn judge(&self) -> Duration {
        Duration::from_millis(self.judge_ms)
    }
    pub fn failure(&self) -> Duration {
        Duration::from_millis(self.failure_ms)
    }
}

fn default_history_limit() -> usize {
    10
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Conversation turns handed to planning/composition as context
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Fallback timezone when the inbound request does not carry one
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            style: StyleConfig::default(),
            timeouts: TimeoutConfig::default(),
            history_limit: default_history_limit(),
            default_timezone: default_timezone(),
        }
    }
}

impl EngineConfig {
    pub fn load_from_str(yaml: &str) -> EngineResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::Config(format!("engine config parse error: {e}")))
    }

    pub fn load_from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::load_from_str(&content)
    }

    /// Defaults with environment overrides for the knobs operators
    /// actually turn (`CONCIERGE_TIMEZONE`, `CONCIERGE_HISTORY_LIMIT`).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(tz) = std::env::var("CONCIERGE_TIMEZONE") {
            if !tz.trim().is_empty() {
                config.default_timezone = tz;
            }
        }
        if let Ok(limit) = std::env::var("CONCIERGE_HISTORY_LIMIT") {
            if let Ok(limit) = limit.parse() {
                config.history_limit = limit;
            }
        }
        config
    }
}
