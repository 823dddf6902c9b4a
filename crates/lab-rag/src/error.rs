//! Error taxonomy for the recommender.
//!
//! Only corpus/index loading errors are allowed to stop the process. Failures of
//! the external embedding and generation services are converted into degraded,
//! in-band answers at the dispatcher boundary.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LabRagError {
    /// Corpus or index file could not be read.
    #[error("source not found: {}: {reason}", path.display())]
    SourceNotFound { path: PathBuf, reason: String },

    /// Malformed corpus entry or index snapshot.
    #[error("data format error in {entry}: {reason}")]
    DataFormat { entry: String, reason: String },

    #[error("embedding failed for {item}: {reason}")]
    EmbeddingFailure { item: String, reason: String },

    #[error("generation failed: {0}")]
    GenerationFailure(String),

    #[error("could not parse classification: {0}")]
    ClassificationParse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("query is empty")]
    EmptyQuery,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LabRagError>;
