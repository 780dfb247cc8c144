//! # recall-rocks
//!
//! Embedded hybrid search index for assistant session memory: session
//! transcripts, derived milestones, and curated knowledge are retrievable
//! by BM25 keyword match and by semantic similarity from a single write
//! path.
//!
//! - [`lexical`]: persistent Okapi BM25 inverted index over RocksDB.
//! - [`semantic`]: vector index over a single JSON table file with atomic
//!   commits, cross-process write exclusion, and corruption repair.
//! - [`hybrid`]: pure extractors for domain objects plus the mirror that
//!   replays every semantic write into the lexical index.
//! - [`embeddings`]: the external embedding collaborator (lazy, batched).
//!
//! # Example
//!
//! ```rust,ignore
//! let lexical = Arc::new(LexicalIndex::open(&dir.join("lexical"))?);
//! let semantic = SemanticIndex::new(
//!     &dir.join("semantic"),
//!     embedder,
//!     Some(Arc::clone(&lexical)),
//! );
//!
//! semantic.add_vectors(extract_milestone(&milestone)).await?;
//!
//! // Both surfaces stay consistent from the single write path:
//! let keyword = lexical.search("token refresh", 10, None)?;
//! let nearest = semantic.search("token refresh", 10, &SearchFilter::default()).await?;
//! ```

pub mod embeddings;
pub mod hybrid;
pub mod lexical;
pub mod semantic;
pub mod types;

pub use embeddings::{EmbeddingProvider, LazyEmbedder, OpenAiEmbedder};
pub use hybrid::{extract_knowledge, extract_milestone};
pub use lexical::{LexicalDoc, LexicalHit, LexicalIndex, LexicalStats};
pub use semantic::{SearchFilter, SemanticHit, SemanticIndex, SemanticStats};
pub use types::{
    ContentKind, DocKind, DocMeta, IndexError, IndexItem, Knowledge, KnowledgePart, Milestone,
    Result,
};
