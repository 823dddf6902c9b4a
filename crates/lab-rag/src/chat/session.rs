//! One user conversation: classify, dispatch, record. Also parses REPL commands.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::{ConversationState, ConversationTurn};
use crate::error::{LabRagError, Result};
use crate::rag::{ClassificationResult, Intent};
use crate::rag_engine::LabRecommender;
use crate::types::SearchDocument;

/// What the REPL should do with a line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Reset,
    Empty,
    Ask(String),
}

impl Command {
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        match trimmed.to_lowercase().as_str() {
            "quit" | "exit" | "종료" | "끝" => Self::Quit,
            "clear" | "reset" | "초기화" | "새로시작" => Self::Reset,
            _ => Self::Ask(trimmed.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    pub classification: ClassificationResult,
    pub strategy: Intent,
    pub answer: String,
    pub documents: Vec<SearchDocument>,
}

/// One user's conversation against a shared recommender.
pub struct Session {
    id: Uuid,
    state: ConversationState,
    engine: Arc<LabRecommender>,
}

impl Session {
    pub fn new(engine: Arc<LabRecommender>) -> Self {
        let id = Uuid::new_v4();
        info!(session_id = %id, "Session started");
        Self {
            id,
            state: ConversationState::new(),
            engine,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    /// Classify, dispatch, then record exactly one turn.
    pub async fn ask(&mut self, query: &str) -> Result<Reply> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LabRagError::EmptyQuery);
        }

        let classification = self.engine.classifier().classify(query, &self.state).await;
        info!(
            session_id = %self.id,
            intent = %classification.intent,
            reason = %classification.reason,
            "Query classified"
        );

        let outcome = self
            .engine
            .dispatcher()
            .handle(query, classification.intent, &self.state)
            .await;

        self.state.append(ConversationTurn::new(
            query,
            outcome.answer.clone(),
            outcome.documents.clone(),
            classification.intent,
        ));

        Ok(Reply {
            classification,
            strategy: outcome.strategy,
            answer: outcome.answer,
            documents: outcome.documents,
        })
    }

    pub fn reset(&mut self) {
        self.state.clear();
        info!(session_id = %self.id, "Conversation cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_keywords() {
        assert_eq!(Command::parse("quit"), Command::Quit);
        assert_eq!(Command::parse("  EXIT "), Command::Quit);
        assert_eq!(Command::parse("종료"), Command::Quit);
        assert_eq!(Command::parse("끝"), Command::Quit);
        assert_eq!(Command::parse("Reset"), Command::Reset);
        assert_eq!(Command::parse("초기화"), Command::Reset);
        assert_eq!(Command::parse("새로시작"), Command::Reset);
        assert_eq!(Command::parse("   "), Command::Empty);
        assert_eq!(
            Command::parse(" 암 연구 "),
            Command::Ask("암 연구".to_string())
        );
    }
}
