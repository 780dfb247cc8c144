//! Lexical (BM25) retrieval over a persistent key-value store.

pub mod index;
pub mod tokenizer;

pub use index::{
    LexicalDoc, LexicalHit, LexicalIndex, LexicalStats, B, COVERAGE_MIN_TERMS,
    COVERAGE_THRESHOLD, K1,
};
pub use tokenizer::{query_terms, tokenize};
