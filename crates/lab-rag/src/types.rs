use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One professor in the corpus. Immutable after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub name: String,
    pub degree: String,
    pub university: String,
    pub department: String,
    pub lab_name: String,
    pub keywords: String,
    pub description: String,
    pub topics: Vec<String>,
    pub techniques: Vec<String>,
    pub publications: Vec<String>,
    pub email: String,
    pub phone: String,
    pub career: Option<String>,
    pub mentoring: Option<String>,
}

/// Identity of a search document. Equal to the source profile's display name,
/// which is unique within a corpus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Indexed projection of a [`ProfileRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: DocumentId,
    /// Profile card handed to the generator as context.
    pub text: String,
    /// Compact projection that gets embedded.
    pub search_text: String,
    pub metadata: BTreeMap<String, String>,
}

impl SearchDocument {
    pub fn professor_name(&self) -> &str {
        self.metadata
            .get("professor_name")
            .map(String::as_str)
            .unwrap_or_else(|| self.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub document: SearchDocument,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Prefix of `text` holding at most `max_chars` Unicode scalar values.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
