//! Pure extraction of indexable items from domain objects.
//!
//! Extractors are synchronous and side-effect free: they turn a milestone or
//! knowledge entry into the list of (text, metadata) units the semantic
//! index embeds. One domain object usually yields several items; the mirror
//! later regroups them into a single lexical document.

use crate::types::{truncate_chars, ContentKind, DocKind, DocMeta, IndexItem, Knowledge, Milestone};

/// Per-prompt truncation applied before prompts are joined into one item.
pub const PROMPT_SNIPPET_CHARS: usize = 200;

fn milestone_meta(m: &Milestone, content_kind: ContentKind) -> DocMeta {
    DocMeta {
        kind: DocKind::Milestone,
        session_id: m.session_id.clone(),
        milestone_index: Some(m.index),
        knowledge_id: None,
        part_id: None,
        content_kind,
        timestamp: m.timestamp,
        project_path: m.project_path.clone(),
        phase: m.phase,
    }
}

/// Extract index items from a milestone.
///
/// Emits one item for the title, one per fact, and one combining the user
/// prompts. Early-phase milestones (no title and no facts) additionally get
/// a synthesized summary from prompts, modified files, and completed tasks
/// so they remain retrievable at all.
pub fn extract_milestone(m: &Milestone) -> Vec<IndexItem> {
    let mut items = Vec::new();

    let title = m.title.as_deref().map(str::trim).filter(|t| !t.is_empty());

    if let Some(title) = title {
        items.push(IndexItem {
            text: title.to_string(),
            meta: milestone_meta(m, ContentKind::Title),
        });
    }

    for fact in m.facts.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
        items.push(IndexItem {
            text: fact.to_string(),
            meta: milestone_meta(m, ContentKind::Fact),
        });
    }

    if !m.user_prompts.is_empty() {
        let combined = m
            .user_prompts
            .iter()
            .map(|p| truncate_chars(p.trim(), PROMPT_SNIPPET_CHARS))
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        if !combined.is_empty() {
            items.push(IndexItem {
                text: combined,
                meta: milestone_meta(m, ContentKind::Prompt),
            });
        }
    }

    if title.is_none() && m.facts.iter().all(|f| f.trim().is_empty()) {
        if let Some(summary) = synthesize_summary(m) {
            items.push(IndexItem {
                text: summary,
                meta: milestone_meta(m, ContentKind::Summary),
            });
        }
    }

    items
}

/// Build a fallback summary for an early-phase milestone.
fn synthesize_summary(m: &Milestone) -> Option<String> {
    let mut parts = Vec::new();

    if let Some(first) = m.user_prompts.first().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        parts.push(format!(
            "Working on: {}",
            truncate_chars(first, PROMPT_SNIPPET_CHARS)
        ));
    }
    if !m.files_modified.is_empty() {
        parts.push(format!("Files: {}", m.files_modified.join(", ")));
    }
    if !m.task_completions.is_empty() {
        parts.push(format!("Tasks: {}", m.task_completions.join(", ")));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(". "))
    }
}

/// Extract index items from a knowledge entry: one per part.
pub fn extract_knowledge(k: &Knowledge) -> Vec<IndexItem> {
    k.parts
        .iter()
        .map(|part| IndexItem {
            text: format!(
                "{} [{}]: {} — {}",
                k.title, k.kind, part.title, part.summary
            ),
            meta: DocMeta {
                kind: DocKind::Knowledge,
                session_id: String::new(),
                milestone_index: None,
                knowledge_id: Some(k.id.clone()),
                part_id: Some(part.part_id.clone()),
                content_kind: ContentKind::KnowledgePart,
                timestamp: k.updated_at,
                project_path: k.project.clone(),
                phase: None,
            },
        })
        .collect()
}
