//! Per-session conversation log.

pub mod session;

pub use session::{Command, Reply, Session};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rag::classifier::Intent;
use crate::types::{truncate_chars, SearchDocument};

/// Answers are cut to this many characters when replayed as context.
const CONTEXT_ANSWER_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub answer: String,
    /// Documents the answer was grounded on, possibly empty.
    pub documents: Vec<SearchDocument>,
    pub intent: Intent,
    pub asked_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(
        query: impl Into<String>,
        answer: impl Into<String>,
        documents: Vec<SearchDocument>,
        intent: Intent,
    ) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
            documents,
            intent,
            asked_at: Utc::now(),
        }
    }
}

/// Append-only turn log. Only [`ConversationState::clear`] removes turns.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    turns: Vec<ConversationTurn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Last `n` turns as `Q:` / `A:` lines, answers truncated.
    pub fn recent_context(&self, n: usize) -> String {
        let start = self.turns.len().saturating_sub(n);
        self.turns[start..]
            .iter()
            .flat_map(|turn| {
                [
                    format!("Q: {}", turn.query),
                    format!("A: {}...", truncate_chars(&turn.answer, CONTEXT_ANSWER_CHARS)),
                ]
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Documents of the most recent turn that retrieved any.
    pub fn last_retrieved_documents(&self) -> &[SearchDocument] {
        self.turns
            .iter()
            .rev()
            .find(|turn| !turn.documents.is_empty())
            .map(|turn| turn.documents.as_slice())
            .unwrap_or(&[])
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
