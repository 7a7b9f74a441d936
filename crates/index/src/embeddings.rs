use crate::VectorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SERVICE: &str = "ollama";

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError>;

    /// Vector size, found by embedding a short sample
    async fn dimension(&self) -> Result<usize, VectorError> {
        Ok(self.embed("dimension").await?.len())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(base_url: String, model: String) -> Self {
        Self {
            base_url,
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|source| VectorError::Request { service: SERVICE, source })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VectorError::Status { service: SERVICE, status, body });
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|source| VectorError::Request { service: SERVICE, source })?;

        if result.embedding.is_empty() {
            return Err(VectorError::EmptyEmbedding(self.model.clone()));
        }

        debug!(model = %self.model, dimension = result.embedding.len(), "Embedded text");
        Ok(result.embedding)
    }
}
