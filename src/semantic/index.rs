//! Semantic (vector) index with crash-safe writes and lexical mirroring.
//!
//! The semantic index is the source of truth: every write embeds its items,
//! commits them to the vector table under both the in-process write mutex
//! and the cross-process lockfile, and only then replays the batch into the
//! injected lexical index. Mirror failures are logged and swallowed; a
//! semantic write never fails because of its lexical shadow.
//!
//! # Concurrency
//!
//! Mutations serialize through one fair `tokio::sync::Mutex`, so writes from
//! one process execute in FIFO order. Each commit additionally holds the
//! lockfile for the entire read-modify-write cycle: cached state is
//! discarded and the on-disk table re-read after acquisition, which prevents
//! the lost update where process B's read predates process A's write. Reads
//! are not serialized; they observe the cached snapshot from just before or
//! just after an in-flight write.

use crate::embeddings::LazyEmbedder;
use crate::hybrid::mirror;
use crate::lexical::LexicalIndex;
use crate::semantic::lock::WriteLock;
use crate::semantic::table::VectorTable;
use crate::types::{
    decode_meta, encode_meta, ContentKind, DocKind, DocMeta, IndexError, IndexItem, Result,
    VectorRecord,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

/// Items embedded and committed per locked transaction.
pub const EMBED_BATCH: usize = 200;

const TABLE_FILE: &str = "index.json";
const LOCK_FILE: &str = "write.lock";

/// Conjunctive equality filter over record metadata.
///
/// Every populated field must match; empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub kind: Option<DocKind>,
    pub session_id: Option<String>,
    pub milestone_index: Option<i64>,
    pub knowledge_id: Option<String>,
    pub part_id: Option<String>,
    pub content_kind: Option<ContentKind>,
    pub project_path: Option<String>,
}

impl SearchFilter {
    /// Filter to a single document kind.
    pub fn kind(kind: DocKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(kind) = self.kind {
            if record.kind != kind.as_str() {
                return false;
            }
        }
        if let Some(session_id) = &self.session_id {
            if &record.session_id != session_id {
                return false;
            }
        }
        if let Some(index) = self.milestone_index {
            if record.milestone_index != index {
                return false;
            }
        }
        if let Some(knowledge_id) = &self.knowledge_id {
            if &record.knowledge_id != knowledge_id {
                return false;
            }
        }
        if let Some(part_id) = &self.part_id {
            if &record.part_id != part_id {
                return false;
            }
        }
        if let Some(content_kind) = self.content_kind {
            if record.content_kind != content_kind.as_str() {
                return false;
            }
        }
        if let Some(project_path) = &self.project_path {
            if &record.project_path != project_path {
                return false;
            }
        }
        true
    }
}

/// A scored semantic search result.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub meta: DocMeta,
}

/// Aggregate row count.
#[derive(Debug, Clone)]
pub struct SemanticStats {
    pub row_count: usize,
}

/// Persistent vector index over a single JSON table file.
pub struct SemanticIndex {
    dir: PathBuf,
    embedder: Arc<LazyEmbedder>,
    /// Injected mirror target; `None` disables lexical mirroring entirely.
    lexical: Option<Arc<LexicalIndex>>,
    /// Snapshot served to readers; replaced wholesale after each commit.
    cache: RwLock<Arc<VectorTable>>,
    /// Fair queue: a write begins only after the previous one completed.
    write_serial: Mutex<()>,
    init_cell: OnceCell<()>,
}

impl SemanticIndex {
    /// Create an index handle rooted at `dir`. No I/O happens until
    /// [`init`](Self::init) or the first operation.
    pub fn new(
        dir: &Path,
        embedder: Arc<LazyEmbedder>,
        lexical: Option<Arc<LexicalIndex>>,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            embedder,
            lexical,
            cache: RwLock::new(Arc::new(VectorTable::default())),
            write_serial: Mutex::new(()),
            init_cell: OnceCell::new(),
        }
    }

    /// Idempotent, memoized initialization.
    ///
    /// Validates (and if needed repairs) the on-disk table before first use,
    /// then spawns a best-effort lexical bootstrap. Concurrent callers share
    /// one initialization; a failed attempt is retried on the next call.
    pub async fn init(&self) -> Result<()> {
        self.init_cell
            .get_or_try_init(|| async {
                std::fs::create_dir_all(&self.dir)?;
                let table = VectorTable::load(&self.table_path())?;
                info!(rows = table.len(), path = %self.table_path().display(), "semantic index opened");

                let snapshot = Arc::new(table);
                self.install_snapshot(Arc::clone(&snapshot));

                if let Some(lexical) = &self.lexical {
                    let lexical = Arc::clone(lexical);
                    tokio::spawn(async move {
                        match mirror::bootstrap(&lexical, &snapshot).await {
                            Ok(0) => {}
                            Ok(n) => info!(docs = n, "bootstrapped lexical index from vector table"),
                            Err(e) => warn!(error = %e, "lexical bootstrap failed"),
                        }
                    });
                }
                Ok::<(), IndexError>(())
            })
            .await?;
        Ok(())
    }

    /// Embed and index a single item.
    pub async fn add_vector(&self, text: &str, meta: &DocMeta) -> Result<usize> {
        self.add_vectors(vec![IndexItem {
            text: text.to_string(),
            meta: meta.clone(),
        }])
        .await
    }

    /// Embed and index a batch of items.
    ///
    /// Large inputs are chunked at [`EMBED_BATCH`] to bound peak memory;
    /// each embedded chunk is committed as one locked transaction and then
    /// mirrored into the lexical index (best-effort). Returns the number of
    /// rows written.
    pub async fn add_vectors(&self, items: Vec<IndexItem>) -> Result<usize> {
        self.init().await?;
        if items.is_empty() {
            return Ok(0);
        }

        let provider = self.embedder.get().await?;
        let mut written = 0usize;

        for (chunk_no, chunk) in items.chunks(EMBED_BATCH).enumerate() {
            let texts: Vec<String> = chunk.iter().map(|i| i.text.clone()).collect();
            let vectors = provider.embed_batch(&texts).await?;
            if vectors.len() != chunk.len() {
                return Err(IndexError::Embedding(format!(
                    "expected {} embeddings, got {}",
                    chunk.len(),
                    vectors.len()
                )));
            }

            let records: Vec<VectorRecord> = chunk
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(i, (item, mut vector))| {
                    normalize(&mut vector);
                    let ordinal = chunk_no * EMBED_BATCH + i;
                    let id = format!(
                        "{}#{}#{}",
                        item.meta.logical_id(),
                        item.meta.content_kind.as_str(),
                        ordinal
                    );
                    encode_meta(id, vector, &item.text, &item.meta)
                })
                .collect();

            self.commit(move |table| {
                // Update is delete-then-reinsert under the same row id.
                let ids: HashSet<String> = records.iter().map(|r| r.id.clone()).collect();
                table.items.retain(|r| !ids.contains(&r.id));
                table.items.extend(records);
                Ok(())
            })
            .await?;
            written += chunk.len();

            if let Some(lexical) = &self.lexical {
                if let Err(e) = mirror::mirror_add(lexical, chunk) {
                    warn!(error = %e, "lexical mirror failed for committed batch");
                }
            }
        }

        Ok(written)
    }

    /// Nearest-neighbor search with an optional conjunctive metadata filter.
    ///
    /// The query is embedded and scored by cosine similarity against the
    /// cached snapshot; scores are bounded to [0, 1]. Rows whose persisted
    /// metadata fails to decode are treated as filtered out.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SemanticHit>> {
        self.init().await?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let provider = self.embedder.get().await?;
        let mut query_vec = provider.embed(query).await?;
        normalize(&mut query_vec);

        let snapshot = self.snapshot();
        let mut hits: Vec<SemanticHit> = snapshot
            .items
            .iter()
            .filter(|r| filter.matches(r))
            .filter_map(|r| {
                if r.vector.len() != query_vec.len() {
                    return None;
                }
                let meta = decode_meta(r)?;
                let score = dot(&query_vec, &r.vector).clamp(0.0, 1.0);
                Some(SemanticHit {
                    id: r.id.clone(),
                    score,
                    text: r.text.clone(),
                    meta,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Delete every row belonging to a session (the session's own items and
    /// all of its milestones). Mirrored as a lexical prefix removal.
    pub async fn delete_session(&self, session_id: &str) -> Result<usize> {
        self.init().await?;

        let session = session_id.to_string();
        let removed = self
            .commit_counted(move |table| {
                let before = table.items.len();
                table.items.retain(|r| r.session_id != session);
                Ok(before - table.items.len())
            })
            .await?;

        if removed > 0 {
            self.mirror_remove_prefix(session_id);
        }
        Ok(removed)
    }

    /// Delete one milestone's rows. Mirrored as a single lexical removal by
    /// composite key.
    pub async fn delete_milestone(&self, session_id: &str, index: i64) -> Result<usize> {
        self.init().await?;

        let session = session_id.to_string();
        let removed = self
            .commit_counted(move |table| {
                let before = table.items.len();
                table.items.retain(|r| {
                    !(r.kind == DocKind::Milestone.as_str()
                        && r.session_id == session
                        && r.milestone_index == index)
                });
                Ok(before - table.items.len())
            })
            .await?;

        if removed > 0 {
            let logical = format!("{}:{}", session_id, index);
            self.mirror_remove_exact(&[logical]);
        }
        Ok(removed)
    }

    /// Delete every row of a knowledge entry. Mirrored as a lexical prefix
    /// removal (part ids share the entry id prefix).
    pub async fn delete_knowledge(&self, knowledge_id: &str) -> Result<usize> {
        self.init().await?;

        let id = knowledge_id.to_string();
        let removed = self
            .commit_counted(move |table| {
                let before = table.items.len();
                table.items.retain(|r| r.knowledge_id != id);
                Ok(before - table.items.len())
            })
            .await?;

        if removed > 0 {
            self.mirror_remove_prefix(knowledge_id);
        }
        Ok(removed)
    }

    /// Delete every row of one kind. Mirrored by enumerating the affected
    /// logical document ids.
    pub async fn delete_all_of_kind(&self, kind: DocKind) -> Result<usize> {
        self.init().await?;

        let mut affected: Vec<String> = Vec::new();
        let removed = self
            .commit_counted(|table| {
                let mut logical: HashSet<String> = HashSet::new();
                let before = table.items.len();
                table.items.retain(|r| {
                    if r.kind == kind.as_str() {
                        if let Some(meta) = decode_meta(r) {
                            logical.insert(meta.logical_id());
                        }
                        false
                    } else {
                        true
                    }
                });
                affected.extend(logical);
                Ok(before - table.items.len())
            })
            .await?;

        if !affected.is_empty() {
            self.mirror_remove_exact(&affected);
        }
        Ok(removed)
    }

    /// Total row count.
    pub async fn stats(&self) -> Result<SemanticStats> {
        self.init().await?;
        Ok(SemanticStats {
            row_count: self.snapshot().len(),
        })
    }

    /// Row counts partitioned by document kind.
    pub async fn stats_by_kind(&self) -> Result<HashMap<String, usize>> {
        self.init().await?;
        let snapshot = self.snapshot();
        let mut counts = HashMap::new();
        for record in &snapshot.items {
            *counts.entry(record.kind.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    // ---- internals -------------------------------------------------------

    fn table_path(&self) -> PathBuf {
        self.dir.join(TABLE_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_FILE)
    }

    fn snapshot(&self) -> Arc<VectorTable> {
        Arc::clone(&self.cache.read().unwrap_or_else(|p| p.into_inner()))
    }

    fn install_snapshot(&self, snapshot: Arc<VectorTable>) {
        *self.cache.write().unwrap_or_else(|p| p.into_inner()) = snapshot;
    }

    /// One locked read-modify-write transaction.
    ///
    /// Holds the in-process serial mutex and the cross-process lockfile for
    /// the whole cycle; the on-disk table is re-read under the lock so the
    /// merge never starts from stale cached state.
    async fn commit<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut VectorTable) -> Result<()>,
    {
        let _serial = self.write_serial.lock().await;
        let _lock = WriteLock::acquire(&self.lock_path()).await?;

        let mut table = VectorTable::load(&self.table_path())?;
        mutate(&mut table)?;
        table.save(&self.table_path())?;
        self.install_snapshot(Arc::new(table));
        Ok(())
    }

    async fn commit_counted<F>(&self, mutate: F) -> Result<usize>
    where
        F: FnOnce(&mut VectorTable) -> Result<usize>,
    {
        let mut count = 0usize;
        let mut mutate = Some(mutate);
        self.commit(|table| {
            let f = mutate.take().ok_or_else(|| {
                IndexError::InvalidInput("commit closure invoked twice".to_string())
            })?;
            count = f(table)?;
            Ok(())
        })
        .await?;
        Ok(count)
    }

    fn mirror_remove_prefix(&self, prefix: &str) {
        if let Some(lexical) = &self.lexical {
            if let Err(e) = lexical.remove_documents_by_prefix(prefix) {
                warn!(prefix, error = %e, "lexical mirror removal failed");
            }
        }
    }

    fn mirror_remove_exact(&self, ids: &[String]) {
        if let Some(lexical) = &self.lexical {
            for id in ids {
                if let Err(e) = lexical.remove_document(id) {
                    warn!(id, error = %e, "lexical mirror removal failed");
                }
            }
        }
    }
}

/// Normalize to unit length; zero vectors are left untouched.
fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::provider::stub::StubEmbedder;
    use crate::embeddings::EmbeddingProvider;
    use crate::hybrid::{extract_knowledge, extract_milestone};
    use crate::types::{Knowledge, KnowledgePart, Milestone};
    use tempfile::TempDir;

    fn stub() -> Arc<LazyEmbedder> {
        Arc::new(LazyEmbedder::from_provider(
            Arc::new(StubEmbedder::new(32)) as Arc<dyn EmbeddingProvider>
        ))
    }

    fn open_pair() -> (SemanticIndex, Arc<LexicalIndex>, TempDir) {
        let dir = TempDir::new().unwrap();
        let lexical = Arc::new(LexicalIndex::open(&dir.path().join("lexical")).unwrap());
        let semantic = SemanticIndex::new(
            &dir.path().join("semantic"),
            stub(),
            Some(Arc::clone(&lexical)),
        );
        (semantic, lexical, dir)
    }

    fn knowledge() -> Knowledge {
        Knowledge {
            id: "K001".to_string(),
            title: "OAuth".to_string(),
            kind: "runbook".to_string(),
            project: None,
            updated_at: None,
            parts: vec![KnowledgePart {
                part_id: "K001.1".to_string(),
                title: "Refresh flow".to_string(),
                summary: "OAuth refresh uses refresh_token grant".to_string(),
            }],
        }
    }

    fn milestone(session: &str, index: i64) -> Milestone {
        Milestone {
            session_id: session.to_string(),
            index,
            title: Some("Fix reconnect backoff".to_string()),
            facts: vec!["Added jitter to reconnect".to_string()],
            user_prompts: vec!["reconnect hammers the server".to_string()],
            files_modified: vec![],
            task_completions: vec![],
            phase: Some(4),
            timestamp: None,
            project_path: None,
        }
    }

    #[tokio::test]
    async fn test_end_to_end_knowledge_search() {
        let (semantic, lexical, _dir) = open_pair();

        semantic
            .add_vectors(extract_knowledge(&knowledge()))
            .await
            .unwrap();
        semantic
            .add_vector(
                "database compaction tuning guide",
                &DocMeta::session("other", ContentKind::Summary),
            )
            .await
            .unwrap();

        // Semantic: the knowledge part outranks the unrelated doc.
        let hits = semantic
            .search("refresh token", 10, &SearchFilter::default())
            .await
            .unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].id.starts_with("K001.1#"));
        assert!(hits[0].score > 0.0);

        // Lexical mirror: the grouped doc is retrievable under its part id.
        let lex_hits = lexical.search("refresh token", 10, None).unwrap();
        assert_eq!(lex_hits[0].id, "K001.1");
        assert!(lex_hits[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_filtered_search() {
        let (semantic, _lexical, _dir) = open_pair();

        semantic
            .add_vectors(extract_knowledge(&knowledge()))
            .await
            .unwrap();
        semantic
            .add_vectors(extract_milestone(&milestone("sess-1", 0)))
            .await
            .unwrap();

        let hits = semantic
            .search("refresh grant", 10, &SearchFilter::kind(DocKind::Milestone))
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.meta.kind == DocKind::Milestone));
    }

    #[tokio::test]
    async fn test_delete_session_removes_rows_and_mirror() {
        let (semantic, lexical, _dir) = open_pair();

        semantic
            .add_vectors(extract_milestone(&milestone("sess-1", 0)))
            .await
            .unwrap();
        semantic
            .add_vectors(extract_milestone(&milestone("sess-2", 0)))
            .await
            .unwrap();
        assert_eq!(lexical.doc_count().unwrap(), 2);

        let removed = semantic.delete_session("sess-1").await.unwrap();
        assert!(removed > 0);

        let stats = semantic.stats().await.unwrap();
        let by_kind = semantic.stats_by_kind().await.unwrap();
        assert_eq!(stats.row_count, by_kind["milestone"]);

        let remaining = semantic
            .search("reconnect", 10, &SearchFilter::default())
            .await
            .unwrap();
        assert!(remaining.iter().all(|h| h.meta.session_id == "sess-2"));
        assert_eq!(lexical.doc_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_milestone_is_scoped() {
        let (semantic, lexical, _dir) = open_pair();

        semantic
            .add_vectors(extract_milestone(&milestone("sess-1", 0)))
            .await
            .unwrap();
        semantic
            .add_vectors(extract_milestone(&milestone("sess-1", 1)))
            .await
            .unwrap();

        semantic.delete_milestone("sess-1", 0).await.unwrap();

        let hits = semantic
            .search("reconnect", 10, &SearchFilter::default())
            .await
            .unwrap();
        assert!(hits.iter().all(|h| h.meta.milestone_index == Some(1)));
        assert_eq!(lexical.doc_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_knowledge_mirrors_by_prefix() {
        let (semantic, lexical, _dir) = open_pair();

        semantic
            .add_vectors(extract_knowledge(&knowledge()))
            .await
            .unwrap();
        assert_eq!(lexical.doc_count().unwrap(), 1);

        let removed = semantic.delete_knowledge("K001").await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(semantic.stats().await.unwrap().row_count, 0);
        assert_eq!(lexical.doc_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_all_of_kind_enumerates_mirror_ids() {
        let (semantic, lexical, _dir) = open_pair();

        semantic
            .add_vectors(extract_knowledge(&knowledge()))
            .await
            .unwrap();
        semantic
            .add_vectors(extract_milestone(&milestone("sess-1", 0)))
            .await
            .unwrap();
        assert_eq!(lexical.doc_count().unwrap(), 2);

        semantic.delete_all_of_kind(DocKind::Milestone).await.unwrap();

        let by_kind = semantic.stats_by_kind().await.unwrap();
        assert!(!by_kind.contains_key("milestone"));
        assert_eq!(by_kind["knowledge"], 1);
        assert_eq!(lexical.doc_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_reindex_same_items_does_not_duplicate() {
        let (semantic, _lexical, _dir) = open_pair();

        let items = extract_knowledge(&knowledge());
        semantic.add_vectors(items.clone()).await.unwrap();
        semantic.add_vectors(items).await.unwrap();

        assert_eq!(semantic.stats().await.unwrap().row_count, 1);
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let semantic_dir = dir.path().join("semantic");

        {
            let semantic = SemanticIndex::new(&semantic_dir, stub(), None);
            semantic
                .add_vectors(extract_knowledge(&knowledge()))
                .await
                .unwrap();
        }

        let reopened = SemanticIndex::new(&semantic_dir, stub(), None);
        assert_eq!(reopened.stats().await.unwrap().row_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_serialize() {
        let (semantic, _lexical, _dir) = open_pair();
        let semantic = Arc::new(semantic);

        let mut handles = Vec::new();
        for i in 0..4 {
            let semantic = Arc::clone(&semantic);
            handles.push(tokio::spawn(async move {
                semantic
                    .add_vectors(extract_milestone(&milestone(&format!("sess-{}", i), 0)))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let by_kind = semantic.stats_by_kind().await.unwrap();
        // 4 milestones, 3 fragments each (title, fact, prompts).
        assert_eq!(by_kind["milestone"], 12);
    }
}
