use std::time::{Duration, Instant};

use async_trait::async_trait;
use kgrag_observability::log_external_call;
use reqwest::Client;
use serde_json::json;

use super::Embedder;
use crate::errors::{GraphError, GraphResult};

/// Embedding client for text-embeddings-inference style servers (`POST /embed`).
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    base_url: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, dimension: usize, timeout: Duration) -> GraphResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> GraphResult<Vec<f32>> {
        let url = format!("{}/embed", self.base_url);
        log_external_call!("embedding", url.as_str());
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .json(&json!({ "inputs": text }))
            .send()
            .await?;

        let status = response.status();
        log_external_call!("embedding", url.as_str(), start.elapsed().as_millis() as u64, status.as_u16());
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("❌ Embedding service error {}: {}", status, error_text);
            return Err(GraphError::Embedding(format!("{} - {}", status, error_text)));
        }

        let vectors: Vec<Vec<f32>> = response.json().await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::Embedding("no embedding returned".to_string()))?;
        if vector.len() != self.dimension {
            return Err(GraphError::Embedding(format!(
                "expected dimension {}, got {}",
                self.dimension,
                vector.len()
            )));
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
