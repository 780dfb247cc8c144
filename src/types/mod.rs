//! Core types: errors, the document model, and domain inputs.

pub mod document;
pub mod domain;
pub mod error;

pub use document::{
    decode_meta, encode_meta, truncate_chars, ContentKind, DocKind, DocMeta, IndexItem,
    VectorRecord, MAX_STORED_TEXT,
};
pub use domain::{Knowledge, KnowledgePart, Milestone};
pub use error::{IndexError, Result};
