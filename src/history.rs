//! Conversation history
//!
//! Bounded per-conversation ring of recent turns. History is contextual
//! input to planning and composition only; the engine does no cross-request
//! planning with it.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One prior message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Storage for recent conversation turns
pub trait HistoryStore: Send + Sync {
    /// Most recent turns in chronological order, at most `limit`.
    fn recent(&self, conversation_id: &str, limit: usize) -> Vec<ConversationTurn>;

    fn append(&self, conversation_id: &str, turn: ConversationTurn);
}

/// Process-local history store with a fixed per-conversation capacity
#[derive(Debug)]
pub struct InMemoryHistoryStore {
    turns: Mutex<HashMap<String, VecDeque<ConversationTurn>>>,
    capacity: usize,
}

impl InMemoryHistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            turns: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(20)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn recent(&self, conversation_id: &str, limit: usize) -> Vec<ConversationTurn> {
        let guard = match self.turns.lock() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };
        match guard.get(conversation_id) {
            Some(ring) => {
                let skip = ring.len().saturating_sub(limit);
                ring.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    fn append(&self, conversation_id: &str, turn: ConversationTurn) {
        if let Ok(mut guard) = self.turns.lock() {
            let ring = guard.entry(conversation_id.to_string()).or_default();
            ring.push_back(turn);
            while ring.len() > self.capacity {
                ring.pop_front();
            }
        }
    }
}
