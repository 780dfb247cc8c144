//! OpenAI-compatible embedding client.
//!
//! Speaks the `POST {base}/embeddings` protocol, so it works against
//! api.openai.com as well as any local server exposing the same shape
//! (text-embeddings-inference, llama.cpp, LM Studio). Endpoint, model,
//! and dimensionality are caller configuration; only the hosted OpenAI
//! models get their dimensions inferred by name.

use crate::embeddings::provider::EmbeddingProvider;
use crate::types::{IndexError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Hosted OpenAI endpoint, used when no base URL is given.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

const FALLBACK_DIMENSIONS: usize = 1536;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

/// Embedding provider for any OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    client: Client,
}

impl OpenAiEmbedder {
    /// Client for the hosted OpenAI API, with dimensions inferred from
    /// the model name.
    pub fn new(api_key: String, model: String) -> Self {
        let dimensions = infer_dimensions(&model);
        Self::with_endpoint(DEFAULT_BASE_URL.to_string(), api_key, model, dimensions)
    }

    /// Client for an arbitrary compatible endpoint with explicit
    /// dimensions. Local servers commonly run much smaller models
    /// (e.g. 384-dimensional MiniLM), which the hosted table cannot know.
    pub fn with_endpoint(
        base_url: String,
        api_key: String,
        model: String,
        dimensions: usize,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimensions,
            client: Client::new(),
        }
    }

    fn embeddings_url(&self) -> String {
        format!("{}/embeddings", self.base_url)
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input,
        };

        // Local servers often run without auth; skip the header entirely
        // rather than sending an empty bearer token.
        let mut request = self.client.post(self.embeddings_url()).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IndexError::Embedding(format!("embedding request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(IndexError::Embedding(format!(
                "embedding endpoint returned {}: {}",
                status, detail
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| IndexError::Embedding(format!("malformed embedding response: {}", e)))?;

        if parsed.data.len() != input.len() {
            return Err(IndexError::Embedding(format!(
                "requested {} embeddings, endpoint returned {}",
                input.len(),
                parsed.data.len()
            )));
        }

        // Each row carries an explicit index; order by it instead of
        // trusting array order.
        let mut rows = parsed.data;
        rows.sort_by_key(|r| r.index);
        Ok(rows.into_iter().map(|r| r.embedding).collect())
    }
}

fn infer_dimensions(model: &str) -> usize {
    match model {
        "text-embedding-3-small" | "text-embedding-ada-002" => 1536,
        "text-embedding-3-large" => 3072,
        _ => FALLBACK_DIMENSIONS,
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| IndexError::Embedding("endpoint returned no embedding".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
