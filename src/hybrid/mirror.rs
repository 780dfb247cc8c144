//! Replays vector-index writes and deletes into the lexical index.
//!
//! Several embedded fragments (a milestone's title, facts, prompts) belong
//! to one retrievable unit, so the mirror groups a committed batch by
//! logical document id, concatenates the texts, and issues one lexical
//! `add_document` per group. The lexical index is a derived accelerator:
//! every entry point here is best-effort from the caller's perspective and
//! failures are logged, never propagated to the semantic write.

use crate::lexical::{LexicalDoc, LexicalIndex};
use crate::semantic::table::VectorTable;
use crate::types::{decode_meta, IndexItem, Result};
use std::collections::HashMap;

/// Grouped documents written per bootstrap chunk before yielding.
pub const BOOTSTRAP_CHUNK: usize = 100;

/// Separator between fragments concatenated into one lexical document.
const FRAGMENT_SEPARATOR: &str = "\n";

/// Group items by logical document id, preserving first-seen order.
///
/// Each group becomes one lexical document whose text is the concatenation
/// of all fragment texts and whose metadata is the first fragment's.
pub fn group_items(items: &[IndexItem]) -> Vec<LexicalDoc> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, LexicalDoc> = HashMap::new();

    for item in items {
        let id = item.meta.logical_id();
        match groups.get_mut(&id) {
            Some(doc) => {
                doc.text.push_str(FRAGMENT_SEPARATOR);
                doc.text.push_str(&item.text);
            }
            None => {
                order.push(id.clone());
                groups.insert(
                    id.clone(),
                    LexicalDoc {
                        id,
                        text: item.text.clone(),
                        meta: item.meta.clone(),
                    },
                );
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| groups.remove(&id))
        .collect()
}

/// Mirror a committed batch of items into the lexical index.
pub fn mirror_add(lexical: &LexicalIndex, items: &[IndexItem]) -> Result<()> {
    let docs = group_items(items);
    lexical.add_documents(&docs)
}

/// Rebuild the lexical index from the vector table's full contents.
///
/// Runs only when the lexical index is empty while the vector table is not
/// (a deleted or never-built lexical store next to live semantic data).
/// Grouping happens over the whole table first so fragments of one logical
/// document never split across `add_documents` calls; writes then proceed
/// in bounded chunks with cooperative yielding so a large one-time rebuild
/// does not starve concurrent request handling.
pub async fn bootstrap(lexical: &LexicalIndex, table: &VectorTable) -> Result<usize> {
    if table.is_empty() || lexical.doc_count()? > 0 {
        return Ok(0);
    }

    let items: Vec<IndexItem> = table
        .items
        .iter()
        .filter_map(|record| {
            decode_meta(record).map(|meta| IndexItem {
                text: record.text.clone(),
                meta,
            })
        })
        .collect();

    let docs = group_items(&items);
    let total = docs.len();

    for chunk in docs.chunks(BOOTSTRAP_CHUNK) {
        lexical.add_documents(chunk)?;
        tokio::task::yield_now().await;
    }

    Ok(total)
}
