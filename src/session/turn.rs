//! Conversation turns and the append-only transcript.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identity of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    User,
    Assistant,
}

/// One message in the conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub id: TurnId,
    pub author: Author,
    pub text: String,
}

impl Turn {
    pub fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            id: TurnId::new(),
            author,
            text: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Author::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Author::Assistant, text)
    }

    pub fn is_user(&self) -> bool {
        self.author == Author::User
    }
}

/// Ordered transcript. Turns are only ever appended, or all dropped at once.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    turns: Vec<Turn>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Turns in the order they were appended.
    pub fn all_turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Drop every turn. Only used when the model changes.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
