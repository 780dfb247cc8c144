//! Document model shared by the lexical and semantic indexes.
//!
//! A *document* is the logical unit of retrieval: a session, one milestone
//! within a session, or one part of a curated knowledge entry. The semantic
//! index stores one row per extracted text fragment; the lexical index stores
//! one entry per logical document (fragments concatenated by the mirror).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum characters of original text persisted per row.
pub const MAX_STORED_TEXT: usize = 500;

/// Kind of indexed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Session,
    Milestone,
    Knowledge,
}

impl DocKind {
    /// Stable string form used in persisted rows and filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Session => "session",
            DocKind::Milestone => "milestone",
            DocKind::Knowledge => "knowledge",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(DocKind::Session),
            "milestone" => Some(DocKind::Milestone),
            "knowledge" => Some(DocKind::Knowledge),
            _ => None,
        }
    }
}

/// Content tag describing which fragment of the source a row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Title,
    Fact,
    Prompt,
    Summary,
    KnowledgePart,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Title => "title",
            ContentKind::Fact => "fact",
            ContentKind::Prompt => "prompt",
            ContentKind::Summary => "summary",
            ContentKind::KnowledgePart => "knowledge_part",
        }
    }
}

/// Metadata attached to every indexed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    /// Kind of source document
    pub kind: DocKind,

    /// Owning session
    pub session_id: String,

    /// Milestone ordinal within the session (milestones only)
    #[serde(default)]
    pub milestone_index: Option<i64>,

    /// Knowledge entry id (knowledge only)
    #[serde(default)]
    pub knowledge_id: Option<String>,

    /// Knowledge part id (knowledge only)
    #[serde(default)]
    pub part_id: Option<String>,

    /// Which fragment of the source this is
    pub content_kind: ContentKind,

    /// Source timestamp
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    /// Project the session belongs to
    #[serde(default)]
    pub project_path: Option<String>,

    /// Integer quality signal from milestone extraction
    #[serde(default)]
    pub phase: Option<i64>,
}

impl DocMeta {
    /// Minimal metadata for a session-kind item.
    pub fn session(session_id: impl Into<String>, content_kind: ContentKind) -> Self {
        Self {
            kind: DocKind::Session,
            session_id: session_id.into(),
            milestone_index: None,
            knowledge_id: None,
            part_id: None,
            content_kind,
            timestamp: None,
            project_path: None,
            phase: None,
        }
    }

    /// Logical document id used to group fragments into one lexical entry.
    ///
    /// Knowledge rows group by part (falling back to the entry id), milestones
    /// by `session:index`, sessions by session id.
    pub fn logical_id(&self) -> String {
        match self.kind {
            DocKind::Knowledge => self
                .part_id
                .clone()
                .or_else(|| self.knowledge_id.clone())
                .unwrap_or_else(|| self.session_id.clone()),
            DocKind::Milestone => {
                format!("{}:{}", self.session_id, self.milestone_index.unwrap_or(0))
            }
            DocKind::Session => self.session_id.clone(),
        }
    }
}

/// One text fragment queued for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexItem {
    pub text: String,
    pub meta: DocMeta,
}

/// Persisted semantic-index row.
///
/// The table schema is fixed, so optional metadata is stored with sentinel
/// values (`""` for absent strings, `-1` for absent integers). Only
/// [`encode_meta`] and [`decode_meta`] touch the sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub kind: String,
    pub session_id: String,
    pub milestone_index: i64,
    pub knowledge_id: String,
    pub part_id: String,
    pub content_kind: String,
    pub text: String,
    pub timestamp: String,
    pub project_path: String,
    pub phase: i64,
}

/// Encode metadata into a fixed-schema row, applying sentinels for absent
/// fields and truncating stored text.
pub fn encode_meta(id: String, vector: Vec<f32>, text: &str, meta: &DocMeta) -> VectorRecord {
    VectorRecord {
        id,
        vector,
        kind: meta.kind.as_str().to_string(),
        session_id: meta.session_id.clone(),
        milestone_index: meta.milestone_index.unwrap_or(-1),
        knowledge_id: meta.knowledge_id.clone().unwrap_or_default(),
        part_id: meta.part_id.clone().unwrap_or_default(),
        content_kind: meta.content_kind.as_str().to_string(),
        text: truncate_chars(text, MAX_STORED_TEXT),
        timestamp: meta
            .timestamp
            .map(|t| t.to_rfc3339())
            .unwrap_or_default(),
        project_path: meta.project_path.clone().unwrap_or_default(),
        phase: meta.phase.unwrap_or(-1),
    }
}

/// Decode a fixed-schema row back into metadata, mapping sentinels to `None`.
///
/// Rows with an unknown kind or content tag decode to `None` and are treated
/// as filtered out by callers.
pub fn decode_meta(record: &VectorRecord) -> Option<DocMeta> {
    let kind = DocKind::parse(&record.kind)?;
    let content_kind = match record.content_kind.as_str() {
        "title" => ContentKind::Title,
        "fact" => ContentKind::Fact,
        "prompt" => ContentKind::Prompt,
        "summary" => ContentKind::Summary,
        "knowledge_part" => ContentKind::KnowledgePart,
        _ => return None,
    };

    Some(DocMeta {
        kind,
        session_id: record.session_id.clone(),
        milestone_index: (record.milestone_index >= 0).then_some(record.milestone_index),
        knowledge_id: (!record.knowledge_id.is_empty()).then(|| record.knowledge_id.clone()),
        part_id: (!record.part_id.is_empty()).then(|| record.part_id.clone()),
        content_kind,
        timestamp: DateTime::parse_from_rfc3339(&record.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        project_path: (!record.project_path.is_empty()).then(|| record.project_path.clone()),
        phase: (record.phase >= 0).then_some(record.phase),
    })
}

/// Truncate on a char boundary without splitting multi-byte characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
