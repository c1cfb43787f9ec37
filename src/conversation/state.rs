//! Conversation state and the bounded turn history.
//!
//! [`ConversationState`] is owned by the controller and changed only on its
//! task.  The display never reads it directly; it sees status strings and
//! copies of [`ConversationTurn`]s published through the notification sink.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ConversationState
// ---------------------------------------------------------------------------

/// States of the conversation controller.
///
/// ```text
/// Dormant ──calibrated──▶ WakeListening ──wake phrase / typed query──▶ ActiveTurn
///                               ▲                                        │
///                               └────────────────quit word───────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConversationState {
    /// Not started; the microphone has not been calibrated yet.
    #[default]
    Dormant,

    /// The background listener is running and every utterance is checked
    /// for the wake phrase.
    WakeListening,

    /// Queries are captured directly and answered until a quit word.
    ActiveTurn,
}

impl ConversationState {
    pub fn label(&self) -> &'static str {
        match self {
            ConversationState::Dormant => "Dormant",
            ConversationState::WakeListening => "WakeListening",
            ConversationState::ActiveTurn => "ActiveTurn",
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// ConversationTurn
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One entry of the transcript.  Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl ConversationTurn {
    /// A turn stamped with the current local time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConversationHistory
// ---------------------------------------------------------------------------

/// Default number of turns kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Fixed-capacity, oldest-first list of turns.
///
/// ```
/// use voice_assistant::conversation::{ConversationHistory, ConversationTurn, Role};
///
/// let mut history = ConversationHistory::new(2);
/// history.push(ConversationTurn::new(Role::User, "one"));
/// history.push(ConversationTurn::new(Role::Assistant, "two"));
/// let evicted = history.push(ConversationTurn::new(Role::User, "three"));
///
/// assert_eq!(evicted.unwrap().content, "one");
/// assert_eq!(history.len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    turns: VecDeque<ConversationTurn>,
    capacity: usize,
}

impl ConversationHistory {
    /// A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `turn`, returning the evicted oldest turn when full.
    pub fn push(&mut self, turn: ConversationTurn) -> Option<ConversationTurn> {
        let evicted = if self.turns.len() == self.capacity {
            self.turns.pop_front()
        } else {
            None
        };
        self.turns.push_back(turn);
        evicted
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
