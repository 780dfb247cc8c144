//! Domain inputs consumed by the extractors.
//!
//! These mirror the shapes produced upstream (session tracker and knowledge
//! curation); the index only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A derived unit of completed work within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub session_id: String,

    /// Ordinal of this milestone within its session
    pub index: i64,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub facts: Vec<String>,

    #[serde(default)]
    pub user_prompts: Vec<String>,

    #[serde(default)]
    pub files_modified: Vec<String>,

    #[serde(default)]
    pub task_completions: Vec<String>,

    /// Extraction quality signal; early-phase milestones have no title/facts
    #[serde(default)]
    pub phase: Option<i64>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub project_path: Option<String>,
}

/// One part of a curated knowledge entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgePart {
    pub part_id: String,
    pub title: String,
    pub summary: String,
}

/// A curated knowledge entry with its parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knowledge {
    pub id: String,
    pub title: String,

    /// Knowledge category tag (e.g. "runbook", "decision")
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub parts: Vec<KnowledgePart>,
}
