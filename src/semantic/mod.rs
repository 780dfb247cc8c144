//! Semantic (vector) retrieval with crash-safe persistence.

pub mod index;
pub mod lock;
pub mod table;

pub use index::{SearchFilter, SemanticHit, SemanticIndex, SemanticStats, EMBED_BATCH};
pub use lock::{WriteLock, LOCK_POLL, LOCK_STALE, LOCK_TIMEOUT};
pub use table::{VectorTable, TABLE_VERSION};
