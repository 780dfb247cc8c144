//! Text embedding providers.
//!
//! The index treats embedding as an external collaborator: a provider turns
//! text into a fixed-dimension vector, supports batching, and is loaded
//! lazily once per process.

pub mod openai;
pub mod provider;

pub use openai::{OpenAiEmbedder, DEFAULT_BASE_URL};
pub use provider::{EmbeddingProvider, LazyEmbedder};
