//! Extraction and lexical mirroring.
//!
//! The write path is single: callers extract items from domain objects and
//! hand them to the semantic index, which replays each committed batch into
//! the lexical index through the mirror. Neither index is ever written
//! around the other.

pub mod extract;
pub mod mirror;

pub use extract::{extract_knowledge, extract_milestone, PROMPT_SNIPPET_CHARS};
pub use mirror::{bootstrap, group_items, mirror_add, BOOTSTRAP_CHUNK};
