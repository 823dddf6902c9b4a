pub mod chat;
pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod rag;
pub mod rag_engine;
pub mod storage;
pub mod types;

// Re-export primary types for convenience
pub use chat::{Command, ConversationState, ConversationTurn, Reply, Session};
pub use config::{ClassifierPolicy, LabRagConfig};
pub use error::{LabRagError, Result};
pub use rag::{ClassificationResult, DispatchOutcome, Dispatcher, Intent, QueryClassifier};
pub use rag_engine::LabRecommender;
pub use storage::{DiversityMode, FlatIndex, IndexHandle, SimilarityIndex};
pub use types::{DocumentId, ProfileRecord, ScoredDocument, SearchDocument};

// Re-export LLM types
pub use llm::{ApiProvider, GenerationConfig, LLMProvider, ProviderInfo};
pub use embeddings::Embedder;
