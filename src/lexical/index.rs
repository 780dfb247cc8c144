//! Persistent BM25 inverted index over RocksDB.
//!
//! Three column families keep the index state in independent namespaces so
//! updates to one never rewrite the others:
//!
//! - `postings`: term -> map<doc_id, term_frequency>
//! - `docs`: doc_id -> entry {length, terms, meta}
//! - `stats`: single cached corpus aggregate (total length + doc count)
//!
//! The `terms` list on each doc entry exists solely so removal is O(doc
//! terms) instead of a full posting scan. Corpus stats are persisted once per
//! call, so batched adds write them once for the whole batch.
//!
//! # Scoring
//!
//! Okapi BM25 with two precision heuristics for identifier-like queries:
//! queries containing `/` switch to boolean presence scoring (tf capped at
//! 1), and queries with three or more distinct terms get a coverage boost
//! when a document matches more than half of them. Both are empirically
//! tuned and deliberately exposed as overridable constants.

use crate::lexical::tokenizer::{query_terms, tokenize};
use crate::types::{DocKind, DocMeta, IndexError, Result};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, DB};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// BM25 term-frequency saturation.
pub const K1: f64 = 1.5;

/// BM25 length-normalization strength.
pub const B: f64 = 0.5;

/// Minimum distinct query terms before the coverage boost activates.
pub const COVERAGE_MIN_TERMS: usize = 3;

/// Coverage fraction a document must exceed to receive the boost.
pub const COVERAGE_THRESHOLD: f64 = 0.5;

const CF_POSTINGS: &str = "postings";
const CF_DOCS: &str = "docs";
const CF_STATS: &str = "stats";
const STATS_KEY: &[u8] = b"corpus";

/// Legacy single-file snapshot migrated on first open of an empty store.
const LEGACY_SNAPSHOT: &str = "legacy-index.jsonl";

/// Cached corpus aggregate, persisted so reopen never rescans.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CorpusStats {
    total_doc_length: u64,
    doc_count: u64,
}

/// Stored per-document entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocEntry {
    /// Token count of the indexed text
    length: u32,
    /// Distinct terms in this document, kept for O(terms) removal
    terms: Vec<String>,
    meta: DocMeta,
}

/// One line of the legacy snapshot format.
#[derive(Debug, Deserialize)]
struct LegacyDocRow {
    id: String,
    text: String,
    meta: DocMeta,
}

/// A scored lexical search result.
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: String,
    pub score: f64,
    pub meta: DocMeta,
}

/// Aggregate index statistics.
#[derive(Debug, Clone)]
pub struct LexicalStats {
    pub doc_count: u64,
    pub term_count: u64,
    pub avg_doc_length: f64,
}

/// A document queued for lexical indexing.
#[derive(Debug, Clone)]
pub struct LexicalDoc {
    pub id: String,
    pub text: String,
    pub meta: DocMeta,
}

/// Persistent BM25 index.
///
/// Reads are lock-free; mutations serialize through an internal guard so the
/// corpus-stats invariant (`total == sum of doc lengths`, `count == live
/// docs`) holds after every completed write.
pub struct LexicalIndex {
    db: DB,
    write_guard: Mutex<()>,
}

impl LexicalIndex {
    /// Open (or create) the index in `dir`.
    ///
    /// If the store is empty and a legacy snapshot file exists beside it,
    /// a one-time migration rebuilds postings, docs, and stats from it.
    ///
    /// # Errors
    ///
    /// Returns `IndexError::Storage` if RocksDB cannot be opened.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_POSTINGS, Options::default()),
            ColumnFamilyDescriptor::new(CF_DOCS, Options::default()),
            ColumnFamilyDescriptor::new(CF_STATS, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, dir.join("store"), cfs)?;
        let index = Self {
            db,
            write_guard: Mutex::new(()),
        };

        index.migrate_legacy_snapshot(&dir.join(LEGACY_SNAPSHOT))?;

        Ok(index)
    }

    /// Add a single document, replacing any prior entry with the same id.
    pub fn add_document(&self, id: &str, text: &str, meta: &DocMeta) -> Result<()> {
        self.add_documents(&[LexicalDoc {
            id: id.to_string(),
            text: text.to_string(),
            meta: meta.clone(),
        }])
    }

    /// Add a batch of documents. Corpus stats are persisted once for the
    /// whole batch, not per item.
    pub fn add_documents(&self, docs: &[LexicalDoc]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut stats = self.load_stats()?;
        for doc in docs {
            self.add_inner(&doc.id, &doc.text, &doc.meta, &mut stats)?;
        }
        self.store_stats(&stats)
    }

    /// Remove a document by id. Returns `true` if it existed.
    pub fn remove_document(&self, id: &str) -> Result<bool> {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut stats = self.load_stats()?;
        let removed = self.remove_inner(id, &mut stats)?;
        if removed {
            self.store_stats(&stats)?;
        }
        Ok(removed)
    }

    /// Remove every document whose id starts with `prefix`. Returns the
    /// number of documents removed.
    pub fn remove_documents_by_prefix(&self, prefix: &str) -> Result<usize> {
        let _guard = self
            .write_guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let cf = self.cf(CF_DOCS)?;
        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            ids.push(String::from_utf8_lossy(&key).into_owned());
        }

        let mut stats = self.load_stats()?;
        let mut removed = 0;
        for id in &ids {
            if self.remove_inner(id, &mut stats)? {
                removed += 1;
            }
        }
        if removed > 0 {
            self.store_stats(&stats)?;
        }
        Ok(removed)
    }

    /// BM25 search over the corpus.
    ///
    /// The query is tokenized into a set of distinct terms. Queries
    /// containing `/` are treated as path-like and scored by boolean
    /// presence (tf capped at 1). Queries with at least
    /// [`COVERAGE_MIN_TERMS`] distinct terms receive a coverage boost: a
    /// document matching more than [`COVERAGE_THRESHOLD`] of the terms has
    /// its score multiplied by `1 + coverage`.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        kind_filter: Option<DocKind>,
    ) -> Result<Vec<LexicalHit>> {
        let terms = query_terms(query);
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let stats = self.load_stats()?;
        if stats.doc_count == 0 {
            return Ok(Vec::new());
        }

        let n = stats.doc_count as f64;
        let avgdl = stats.total_doc_length as f64 / n;
        let path_mode = query.contains('/');

        // Lazily loaded doc cache: a doc referenced by a posting but missing
        // from the docs namespace (concurrent removal) is filtered out.
        let mut doc_cache: HashMap<String, Option<DocEntry>> = HashMap::new();
        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut matched: HashMap<String, usize> = HashMap::new();

        for term in &terms {
            let posting = match self.load_posting(term)? {
                Some(p) => p,
                None => continue,
            };

            let df = posting.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln().max(0.0);

            for (doc_id, tf) in &posting {
                if !doc_cache.contains_key(doc_id) {
                    let loaded = self.load_doc(doc_id)?;
                    doc_cache.insert(doc_id.clone(), loaded);
                }
                let entry = match doc_cache.get(doc_id).and_then(|e| e.as_ref()) {
                    Some(e) => e,
                    None => continue,
                };

                if let Some(kind) = kind_filter {
                    if entry.meta.kind != kind {
                        continue;
                    }
                }

                let tf = if path_mode {
                    (*tf).min(1) as f64
                } else {
                    *tf as f64
                };
                let dl = entry.length as f64;
                let term_score =
                    idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * dl / avgdl));

                *scores.entry(doc_id.clone()).or_insert(0.0) += term_score;
                *matched.entry(doc_id.clone()).or_insert(0) += 1;
            }
        }

        if terms.len() >= COVERAGE_MIN_TERMS {
            for (doc_id, score) in scores.iter_mut() {
                let coverage = matched.get(doc_id).copied().unwrap_or(0) as f64
                    / terms.len() as f64;
                if coverage > COVERAGE_THRESHOLD {
                    *score *= 1.0 + coverage;
                }
            }
        }

        let mut hits: Vec<LexicalHit> = scores
            .into_iter()
            .filter_map(|(id, score)| {
                let entry = doc_cache.get(&id).and_then(|e| e.as_ref())?;
                Some(LexicalHit {
                    id,
                    score,
                    meta: entry.meta.clone(),
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

    /// Document count, term count, and average document length.
    pub fn stats(&self) -> Result<LexicalStats> {
        let stats = self.load_stats()?;
        let cf = self.cf(CF_POSTINGS)?;
        let mut term_count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            term_count += 1;
        }
        let avg = if stats.doc_count > 0 {
            stats.total_doc_length as f64 / stats.doc_count as f64
        } else {
            0.0
        };
        Ok(LexicalStats {
            doc_count: stats.doc_count,
            term_count,
            avg_doc_length: avg,
        })
    }

    /// Number of live documents.
    pub fn doc_count(&self) -> Result<u64> {
        Ok(self.load_stats()?.doc_count)
    }

    // ---- internals -------------------------------------------------------

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| IndexError::Corrupt(format!("missing column family: {}", name)))
    }

    fn load_stats(&self) -> Result<CorpusStats> {
        let cf = self.cf(CF_STATS)?;
        match self.db.get_cf(cf, STATS_KEY)? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(CorpusStats::default()),
        }
    }

    fn store_stats(&self, stats: &CorpusStats) -> Result<()> {
        let cf = self.cf(CF_STATS)?;
        self.db.put_cf(cf, STATS_KEY, bincode::serialize(stats)?)?;
        Ok(())
    }

    fn load_posting(&self, term: &str) -> Result<Option<HashMap<String, u32>>> {
        let cf = self.cf(CF_POSTINGS)?;
        match self.db.get_cf(cf, term.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn load_doc(&self, id: &str) -> Result<Option<DocEntry>> {
        let cf = self.cf(CF_DOCS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Index one document. Caller holds the write guard and persists stats.
    fn add_inner(
        &self,
        id: &str,
        text: &str,
        meta: &DocMeta,
        stats: &mut CorpusStats,
    ) -> Result<()> {
        // No partial updates: an existing doc is fully removed first.
        self.remove_inner(id, stats)?;

        let tokens = tokenize(text);
        let length = tokens.len() as u32;

        let mut freqs: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *freqs.entry(token).or_insert(0) += 1;
        }

        let postings_cf = self.cf(CF_POSTINGS)?;
        for (term, tf) in &freqs {
            let mut posting = self.load_posting(term)?.unwrap_or_default();
            posting.insert(id.to_string(), *tf);
            self.db
                .put_cf(postings_cf, term.as_bytes(), bincode::serialize(&posting)?)?;
        }

        let entry = DocEntry {
            length,
            terms: freqs.into_keys().collect(),
            meta: meta.clone(),
        };
        let docs_cf = self.cf(CF_DOCS)?;
        self.db
            .put_cf(docs_cf, id.as_bytes(), bincode::serialize(&entry)?)?;

        stats.total_doc_length += length as u64;
        stats.doc_count += 1;
        Ok(())
    }

    /// Remove one document. Caller holds the write guard and persists stats.
    fn remove_inner(&self, id: &str, stats: &mut CorpusStats) -> Result<bool> {
        let entry = match self.load_doc(id)? {
            Some(e) => e,
            None => return Ok(false),
        };

        let postings_cf = self.cf(CF_POSTINGS)?;
        for term in &entry.terms {
            if let Some(mut posting) = self.load_posting(term)? {
                posting.remove(id);
                if posting.is_empty() {
                    // Emptied posting lists are deleted, never kept empty.
                    self.db.delete_cf(postings_cf, term.as_bytes())?;
                } else {
                    self.db.put_cf(
                        postings_cf,
                        term.as_bytes(),
                        bincode::serialize(&posting)?,
                    )?;
                }
            }
        }

        let docs_cf = self.cf(CF_DOCS)?;
        self.db.delete_cf(docs_cf, id.as_bytes())?;

        stats.total_doc_length = stats.total_doc_length.saturating_sub(entry.length as u64);
        stats.doc_count = stats.doc_count.saturating_sub(1);
        Ok(true)
    }

    /// One-time migration from the legacy single-file snapshot.
    ///
    /// Runs only when the store holds no documents. Unparseable lines are
    /// skipped individually; the snapshot is renamed afterwards so the
    /// migration never repeats.
    fn migrate_legacy_snapshot(&self, path: &Path) -> Result<()> {
        if !path.exists() || self.load_stats()?.doc_count > 0 {
            return Ok(());
        }

        let contents = std::fs::read_to_string(path)?;
        let mut stats = self.load_stats()?;
        let mut migrated = 0usize;
        let mut skipped = 0usize;

        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LegacyDocRow>(line) {
                Ok(row) => {
                    self.add_inner(&row.id, &row.text, &row.meta, &mut stats)?;
                    migrated += 1;
                }
                Err(e) => {
                    skipped += 1;
                    warn!(error = %e, "skipping malformed legacy snapshot line");
                }
            }
        }

        self.store_stats(&stats)?;
        std::fs::rename(path, path.with_extension("jsonl.migrated"))?;
        info!(migrated, skipped, "migrated legacy lexical snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentKind;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn meta(kind: DocKind) -> DocMeta {
        let mut m = DocMeta::session("sess-1", ContentKind::Summary);
        m.kind = kind;
        m
    }

    fn open_index() -> (LexicalIndex, TempDir) {
        let dir = TempDir::new().unwrap();
        let index = LexicalIndex::open(dir.path()).unwrap();
        (index, dir)
    }

    /// Recompute stats from the docs namespace and compare to the cache.
    fn assert_conserved(index: &LexicalIndex) {
        let cf = index.cf(CF_DOCS).unwrap();
        let mut total = 0u64;
        let mut count = 0u64;
        for item in index.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item.unwrap();
            let entry: DocEntry = bincode::deserialize(&value).unwrap();
            total += entry.length as u64;
            count += 1;
        }
        let stats = index.load_stats().unwrap();
        assert_eq!(stats.total_doc_length, total);
        assert_eq!(stats.doc_count, count);
    }

    #[test]
    fn test_add_and_search_basic() {
        let (index, _dir) = open_index();
        index
            .add_document(
                "K001.1",
                "OAuth refresh uses refresh_token grant",
                &meta(DocKind::Knowledge),
            )
            .unwrap();
        index
            .add_document("other", "database compaction settings", &meta(DocKind::Session))
            .unwrap();

        let hits = index.search("refresh token", 10, None).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, "K001.1");
        assert!(hits[0].score > 0.0);
        assert!(hits.iter().all(|h| h.id != "other" || h.score < hits[0].score));
    }

    #[test]
    fn test_conservation_after_mixed_ops() {
        let (index, _dir) = open_index();
        index
            .add_document("a", "one two three", &meta(DocKind::Session))
            .unwrap();
        index
            .add_document("b", "two three four five", &meta(DocKind::Session))
            .unwrap();
        index
            .add_document("a", "replaced text entirely now longer", &meta(DocKind::Session))
            .unwrap();
        index.remove_document("b").unwrap();
        index.remove_document("missing").unwrap();
        assert_conserved(&index);
    }

    #[test]
    fn test_idempotent_reindex() {
        let (index, _dir) = open_index();
        index
            .add_document("a", "alpha beta gamma", &meta(DocKind::Session))
            .unwrap();
        index
            .add_document("b", "alpha delta", &meta(DocKind::Session))
            .unwrap();

        let before = index.search("alpha beta", 10, None).unwrap();

        index.remove_document("a").unwrap();
        index
            .add_document("a", "alpha beta gamma", &meta(DocKind::Session))
            .unwrap();

        let after = index.search("alpha beta", 10, None).unwrap();
        assert_eq!(before.len(), after.len());
        for (x, y) in before.iter().zip(after.iter()) {
            assert_eq!(x.id, y.id);
            assert!((x.score - y.score).abs() < 1e-12);
        }
        assert_conserved(&index);
    }

    #[test]
    fn test_empty_posting_lists_are_deleted() {
        let (index, _dir) = open_index();
        index
            .add_document("a", "uniqueterm", &meta(DocKind::Session))
            .unwrap();
        assert!(index.load_posting("uniqueterm").unwrap().is_some());
        index.remove_document("a").unwrap();
        assert!(index.load_posting("uniqueterm").unwrap().is_none());
    }

    #[test]
    fn test_idf_never_negative() {
        let (index, _dir) = open_index();
        // "the" appears in every document: worst case for idf.
        for i in 0..5 {
            index
                .add_document(&format!("d{}", i), "the common word", &meta(DocKind::Session))
                .unwrap();
        }
        let hits = index.search("the", 10, None).unwrap();
        assert!(hits.iter().all(|h| h.score >= 0.0));
    }

    #[test]
    fn test_boolean_mode_caps_term_frequency() {
        let (index, _dir) = open_index();
        // Equal length, same term; only tf differs.
        index
            .add_document("d1", "auth auth auth auth auth", &meta(DocKind::Session))
            .unwrap();
        index
            .add_document("d2", "auth fill pad mid rest", &meta(DocKind::Session))
            .unwrap();

        // '/' in the raw query switches to boolean presence scoring.
        let hits = index.search("auth/handlers", 10, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert!((hits[0].score - hits[1].score).abs() < 1e-12);

        // Without the cap, the tf=5 document wins.
        let hits = index.search("auth", 10, None).unwrap();
        assert_eq!(hits[0].id, "d1");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_coverage_boost_monotonicity() {
        let (index, _dir) = open_index();
        // Four-term query; docs of equal length matching 4, 3, and 2 terms.
        index
            .add_document("full", "alpha beta gamma delta", &meta(DocKind::Session))
            .unwrap();
        index
            .add_document("most", "alpha beta gamma pad1", &meta(DocKind::Session))
            .unwrap();
        index
            .add_document("half", "alpha beta pad2 pad3", &meta(DocKind::Session))
            .unwrap();

        let hits = index.search("alpha beta gamma delta", 10, None).unwrap();
        let score = |id: &str| hits.iter().find(|h| h.id == id).unwrap().score;

        assert!(score("full") > score("most"));
        assert!(score("most") > score("half"));
    }

    #[test]
    fn test_length_normalization_prefers_short_specific_doc() {
        let (index, _dir) = open_index();

        // Doc A: 10 tokens, one "auth".
        let text_a = format!("auth {}", vec!["fila"; 9].join(" "));
        index.add_document("a", &text_a, &meta(DocKind::Session)).unwrap();

        // Doc B: 100 tokens, three "auth".
        let mut words_b = vec!["auth", "auth", "auth"];
        let filler: Vec<String> = (0..97).map(|i| format!("w{}", i)).collect();
        words_b.extend(filler.iter().map(|s| s.as_str()));
        index
            .add_document("b", &words_b.join(" "), &meta(DocKind::Session))
            .unwrap();

        // Filler docs keep avgdl representative of a real corpus.
        for i in 0..8 {
            let text = format!("noise{} {}", i, vec!["pad"; 9].join(" "));
            index
                .add_document(&format!("n{}", i), &text, &meta(DocKind::Session))
                .unwrap();
        }

        let hits = index.search("auth", 10, None).unwrap();
        assert_eq!(hits[0].id, "a", "length normalization should favor the short doc");
    }

    #[test]
    fn test_concurrent_reads_share_index() {
        let (index, _dir) = open_index();
        index
            .add_document("a", "alpha beta gamma", &meta(DocKind::Session))
            .unwrap();
        index
            .add_document("b", "alpha delta", &meta(DocKind::Session))
            .unwrap();

        // Readers share one handle across threads; column-family lookups
        // and stats must work through &self.
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let hits = index.search("alpha", 10, None).unwrap();
                    assert_eq!(hits.len(), 2);
                    assert_eq!(index.stats().unwrap().doc_count, 2);
                });
            }
        });
    }

    #[test]
    fn test_kind_filter() {
        let (index, _dir) = open_index();
        index
            .add_document("k1", "oauth token refresh", &meta(DocKind::Knowledge))
            .unwrap();
        index
            .add_document("s1", "oauth token refresh", &meta(DocKind::Session))
            .unwrap();

        let hits = index.search("oauth", 10, Some(DocKind::Knowledge)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "k1");
    }

    #[test]
    fn test_remove_by_prefix() {
        let (index, _dir) = open_index();
        index
            .add_document("sess1:0", "first milestone", &meta(DocKind::Milestone))
            .unwrap();
        index
            .add_document("sess1:1", "second milestone", &meta(DocKind::Milestone))
            .unwrap();
        index
            .add_document("sess2:0", "unrelated milestone", &meta(DocKind::Milestone))
            .unwrap();

        let removed = index.remove_documents_by_prefix("sess1").unwrap();
        assert_eq!(removed, 2);
        assert_eq!(index.doc_count().unwrap(), 1);
        assert_conserved(&index);
    }

    #[test]
    fn test_stats() {
        let (index, _dir) = open_index();
        index
            .add_document("a", "one two three", &meta(DocKind::Session))
            .unwrap();
        index
            .add_document("b", "four five", &meta(DocKind::Session))
            .unwrap();

        let stats = index.stats().unwrap();
        assert_eq!(stats.doc_count, 2);
        assert_eq!(stats.term_count, 5);
        assert!((stats.avg_doc_length - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_legacy_migration_skips_bad_lines() {
        let dir = TempDir::new().unwrap();
        let legacy = dir.path().join(LEGACY_SNAPSHOT);

        let good = serde_json::json!({
            "id": "k1",
            "text": "legacy knowledge text",
            "meta": {
                "kind": "knowledge",
                "session_id": "",
                "knowledge_id": "k1",
                "content_kind": "knowledge_part"
            }
        });
        let contents = format!("{}\nnot json at all\n{}\n", good, good.to_string().replace("k1", "k2"));
        std::fs::write(&legacy, contents).unwrap();

        let index = LexicalIndex::open(dir.path()).unwrap();
        assert_eq!(index.doc_count().unwrap(), 2);
        assert!(!legacy.exists());
        assert!(legacy.with_extension("jsonl.migrated").exists());

        // Reopen: migration must not repeat.
        drop(index);
        let index = LexicalIndex::open(dir.path()).unwrap();
        assert_eq!(index.doc_count().unwrap(), 2);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_conservation(ops in proptest::collection::vec((0u8..3, 0usize..4, 1usize..6), 1..24)) {
            let (index, _dir) = open_index();
            let vocab = ["auth", "token", "rocks", "index", "query", "merge"];

            for (op, id_n, len) in ops {
                let id = format!("doc{}", id_n);
                match op {
                    0 | 1 => {
                        let text = vocab[..len].join(" ");
                        index.add_document(&id, &text, &meta(DocKind::Session)).unwrap();
                    }
                    _ => {
                        index.remove_document(&id).unwrap();
                    }
                }
            }

            assert_conserved(&index);
        }
    }
}
