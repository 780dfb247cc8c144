//! Embedding provider abstraction.

use crate::types::{IndexError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Text embedding provider.
///
/// Implementations return fixed-dimension vectors; the semantic index never
/// inspects the vectors beyond their length.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector dimensionality, constant per provider.
    fn dimensions(&self) -> usize;
}

/// Lazily-constructed embedder, built once per process on first use.
///
/// Wraps a factory so the underlying provider (model load, HTTP client) is
/// only paid for when an embedding is actually requested. `get()` is
/// idempotent; concurrent first calls share one initialization.
pub struct LazyEmbedder {
    cell: OnceCell<Arc<dyn EmbeddingProvider>>,
    factory: Box<dyn Fn() -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>,
}

impl LazyEmbedder {
    /// Create a lazy embedder from a provider factory.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceCell::new(),
            factory: Box::new(factory),
        }
    }

    /// Wrap an already-constructed provider (tests, custom wiring).
    pub fn from_provider(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            cell: OnceCell::new_with(Some(provider)),
            factory: Box::new(|| {
                Err(IndexError::Embedding(
                    "provider already installed".to_string(),
                ))
            }),
        }
    }

    /// Get the provider, constructing it on first call.
    pub async fn get(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let provider = self
            .cell
            .get_or_try_init(|| async { (self.factory)() })
            .await?;
        Ok(Arc::clone(provider))
    }
}


#[cfg(test)]
mod tests {
    use super::stub::StubEmbedder;
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_lazy_embedder_initializes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let lazy = LazyEmbedder::new(move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubEmbedder::new(16)) as Arc<dyn EmbeddingProvider>)
        });

        let a = lazy.get().await.unwrap();
        let b = lazy.get().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.dimensions(), b.dimensions());
    }

    #[tokio::test]
    async fn test_stub_embedder_is_deterministic() {
        let stub = StubEmbedder::new(16);
        let a = stub.embed("oauth refresh token").await.unwrap();
        let b = stub.embed("oauth refresh token").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
