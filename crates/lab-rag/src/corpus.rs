//! Corpus loading.
//!
//! Reads the professor dataset (top-level `교수진` array) into [`ProfileRecord`]s
//! and projects each record into a [`SearchDocument`]. Missing required fields
//! fail the whole load and name the offending entry.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::error::{LabRagError, Result};
use crate::types::{truncate_chars, DocumentId, ProfileRecord, SearchDocument};

pub const COLLECTION_KEY: &str = "교수진";

const DESCRIPTION_CHARS: usize = 200;
const MAX_TOPICS: usize = 5;
const MAX_TECHNIQUES: usize = 5;
const MAX_PUBLICATIONS: usize = 3;
const PUBLICATION_CHARS: usize = 100;
const PART_DELIMITER: &str = " / ";
const LIST_DELIMITER: &str = " | ";

// ---------------------------------------------------------------------------
// Raw dataset shape
// ---------------------------------------------------------------------------

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct RawProfile {
    #[serde(rename = "기본정보")]
    basic: RawBasicInfo,
    #[serde(rename = "연구실", default, deserialize_with = "null_as_default")]
    lab: RawLab,
    #[serde(rename = "연구분야", default, deserialize_with = "null_as_default")]
    field: RawResearchField,
    #[serde(rename = "연구주제", default, deserialize_with = "null_as_default")]
    topics: Vec<String>,
    #[serde(rename = "기술및방법", default, deserialize_with = "null_as_default")]
    techniques: Vec<String>,
    #[serde(rename = "논문", default, deserialize_with = "null_as_default")]
    publications: Vec<String>,
    #[serde(rename = "진로", default)]
    career: Option<Value>,
    #[serde(rename = "멘토링", default)]
    mentoring: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBasicInfo {
    #[serde(rename = "교수이름", default)]
    name: Option<String>,
    #[serde(rename = "대학명", default, deserialize_with = "null_as_default")]
    university: String,
    #[serde(rename = "학과명", default, deserialize_with = "null_as_default")]
    department: String,
    #[serde(rename = "이메일", default, deserialize_with = "null_as_default")]
    email: String,
    #[serde(rename = "전화번호", default, deserialize_with = "null_as_default")]
    phone: String,
    #[serde(rename = "학위", default, deserialize_with = "null_as_default")]
    degree: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawLab {
    #[serde(rename = "연구실명", default, deserialize_with = "null_as_default")]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawResearchField {
    #[serde(rename = "키워드", default, deserialize_with = "null_as_default")]
    keywords: String,
    #[serde(rename = "설명", default, deserialize_with = "null_as_default")]
    description: String,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load and validate every profile in the dataset file at `path`.
pub fn load_profiles(path: &Path) -> Result<Vec<ProfileRecord>> {
    let content = std::fs::read_to_string(path).map_err(|e| LabRagError::SourceNotFound {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let profiles = parse_profiles(&content)?;
    tracing::info!(
        count = profiles.len(),
        path = %path.display(),
        "Loaded professor corpus"
    );
    Ok(profiles)
}

/// Parse the dataset from a JSON string.
pub fn parse_profiles(json: &str) -> Result<Vec<ProfileRecord>> {
    let root: Value = serde_json::from_str(json).map_err(|e| LabRagError::DataFormat {
        entry: "<root>".to_string(),
        reason: e.to_string(),
    })?;

    let entries = root
        .get(COLLECTION_KEY)
        .and_then(Value::as_array)
        .ok_or_else(|| LabRagError::DataFormat {
            entry: "<root>".to_string(),
            reason: format!("missing top-level '{}' array", COLLECTION_KEY),
        })?;

    let mut seen = HashSet::with_capacity(entries.len());
    let mut profiles = Vec::with_capacity(entries.len());

    for (idx, entry) in entries.iter().enumerate() {
        let label = entry_label(idx, entry);
        let raw = RawProfile::deserialize(entry).map_err(|e| LabRagError::DataFormat {
            entry: label.clone(),
            reason: e.to_string(),
        })?;

        let name = raw
            .basic
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| LabRagError::DataFormat {
                entry: label.clone(),
                reason: "missing required field 기본정보.교수이름".to_string(),
            })?
            .to_string();

        if !seen.insert(name.clone()) {
            return Err(LabRagError::DataFormat {
                entry: label,
                reason: format!("duplicate professor name '{}'", name),
            });
        }

        profiles.push(ProfileRecord {
            name,
            degree: raw.basic.degree,
            university: raw.basic.university,
            department: raw.basic.department,
            lab_name: raw.lab.name,
            keywords: raw.field.keywords,
            description: raw.field.description,
            topics: raw.topics,
            techniques: raw.techniques,
            publications: raw.publications,
            email: raw.basic.email,
            phone: raw.basic.phone,
            career: raw.career.as_ref().and_then(flatten_notes),
            mentoring: raw.mentoring.as_ref().and_then(flatten_notes),
        });
    }

    Ok(profiles)
}

/// Free-form notes may be text or nested objects/arrays. Objects render as
/// `key: value` pairs joined by "; ", arrays by ", ". Blank notes are `None`.
fn flatten_notes(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(flatten_notes)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(fields) => fields
            .iter()
            .filter_map(|(key, v)| flatten_notes(v).map(|v| format!("{}: {}", key, v)))
            .collect::<Vec<_>>()
            .join("; "),
    };
    (!text.is_empty()).then_some(text)
}

fn entry_label(idx: usize, entry: &Value) -> String {
    match entry
        .get("기본정보")
        .and_then(|b| b.get("교수이름"))
        .and_then(Value::as_str)
    {
        Some(name) if !name.trim().is_empty() => format!("{}[{}] ({})", COLLECTION_KEY, idx, name),
        _ => format!("{}[{}]", COLLECTION_KEY, idx),
    }
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// Compact text used for embedding. The caps keep embedding and generation
/// requests inside their token budgets and must stay fixed so that rebuilt
/// vectors match previously persisted ones.
pub fn to_search_text(profile: &ProfileRecord) -> String {
    let mut parts = Vec::with_capacity(7);

    parts.push(format!("교수명: {}, 학위: {}", profile.name, profile.degree));

    if !profile.lab_name.is_empty() {
        parts.push(format!("연구실: {}", profile.lab_name));
    }

    if !profile.keywords.is_empty() {
        parts.push(format!("연구분야: {}", profile.keywords));
    }

    if !profile.description.is_empty() {
        parts.push(format!(
            "연구설명: {}",
            truncate_chars(&profile.description, DESCRIPTION_CHARS)
        ));
    }

    if !profile.topics.is_empty() {
        let topics: Vec<&str> = profile.topics.iter().take(MAX_TOPICS).map(String::as_str).collect();
        parts.push(format!("연구주제: {}", topics.join(LIST_DELIMITER)));
    }

    if !profile.techniques.is_empty() {
        let methods: Vec<&str> = profile
            .techniques
            .iter()
            .take(MAX_TECHNIQUES)
            .map(String::as_str)
            .collect();
        parts.push(format!("기술방법: {}", methods.join(LIST_DELIMITER)));
    }

    if !profile.publications.is_empty() {
        let papers: Vec<&str> = profile
            .publications
            .iter()
            .take(MAX_PUBLICATIONS)
            .map(|p| truncate_chars(p, PUBLICATION_CHARS))
            .collect();
        parts.push(format!("최근논문: {}", papers.join(LIST_DELIMITER)));
    }

    parts.join(PART_DELIMITER)
}

/// Full profile card used as generation context.
pub fn profile_card(profile: &ProfileRecord) -> String {
    let mut card = format!(
        "교수명: {}\n대학명: {}\n학과명: {}\n연구실: {}\n연구분야: {}\n연구분야 설명: {}\n연구주제: {}\n기술 및 방법: {}\n이메일: {}\n전화번호: {}\n학위: {}",
        profile.name,
        profile.university,
        profile.department,
        profile.lab_name,
        profile.keywords,
        profile.description,
        profile.topics.join(", "),
        profile.techniques.join(", "),
        profile.email,
        profile.phone,
        profile.degree,
    );

    if !profile.publications.is_empty() {
        card.push_str(&format!("\n논문: {}", profile.publications.join(" | ")));
    }
    if let Some(career) = &profile.career {
        card.push_str(&format!("\n진로: {}", career));
    }
    if let Some(mentoring) = &profile.mentoring {
        card.push_str(&format!("\n멘토링: {}", mentoring));
    }

    card
}

impl From<&ProfileRecord> for SearchDocument {
    fn from(profile: &ProfileRecord) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("professor_name".to_string(), profile.name.clone());
        metadata.insert("university".to_string(), profile.university.clone());
        metadata.insert("department".to_string(), profile.department.clone());
        metadata.insert("lab_name".to_string(), profile.lab_name.clone());
        metadata.insert("email".to_string(), profile.email.clone());
        metadata.insert("phone".to_string(), profile.phone.clone());
        metadata.insert("keywords".to_string(), profile.keywords.clone());

        Self {
            id: DocumentId::new(profile.name.clone()),
            text: profile_card(profile),
            search_text: to_search_text(profile),
            metadata,
        }
    }
}

pub fn to_documents(profiles: &[ProfileRecord]) -> Vec<SearchDocument> {
    profiles.iter().map(SearchDocument::from).collect()
}
