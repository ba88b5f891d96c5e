//! Hybrid retrieval: vector and keyword hits fused into one ranking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use kgrag_models::RetrievalResult;
use kgrag_observability::log_search_executed;

use crate::errors::GraphResult;
use crate::graph_db::{RetrievalBackend, CHUNK_FULLTEXT_INDEX, CHUNK_VECTOR_INDEX};
use crate::llm::Embedder;

const SERVICE: &str = "hybrid-search";

pub struct HybridSearch {
    backend: Arc<dyn RetrievalBackend>,
    embedder: Arc<dyn Embedder>,
    vector_index: String,
    keyword_index: String,
}

impl HybridSearch {
    pub fn new(backend: Arc<dyn RetrievalBackend>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            backend,
            embedder,
            vector_index: CHUNK_VECTOR_INDEX.to_string(),
            keyword_index: CHUNK_FULLTEXT_INDEX.to_string(),
        }
    }

    pub fn with_indexes(mut self, vector_index: impl Into<String>, keyword_index: impl Into<String>) -> Self {
        self.vector_index = vector_index.into();
        self.keyword_index = keyword_index.into();
        self
    }

    /// Up to `k` hits ordered by fused score. A failing source contributes
    /// nothing; this never returns an error.
    pub async fn search(&self, query: &str, k: usize) -> Vec<RetrievalResult> {
        if query.trim().is_empty() || k == 0 {
            return Vec::new();
        }
        let start = Instant::now();

        let (vector_hits, keyword_hits) = tokio::join!(self.vector_hits(query, k), self.keyword_hits(query, k));
        let vector_hits = vector_hits.unwrap_or_else(|e| {
            tracing::warn!("⚠️ Vector search failed, continuing with keyword hits only: {}", e);
            Vec::new()
        });
        let keyword_hits = keyword_hits.unwrap_or_else(|e| {
            tracing::warn!("⚠️ Keyword search failed, continuing with vector hits only: {}", e);
            Vec::new()
        });

        let fused = fuse([vector_hits, keyword_hits], k);
        log_search_executed(SERVICE, "hybrid", fused.len(), start.elapsed().as_millis() as u64);
        fused
    }

    async fn vector_hits(&self, query: &str, k: usize) -> GraphResult<Vec<RetrievalResult>> {
        let embedding = self.embedder.embed(query).await?;
        self.backend.vector_search(&embedding, &self.vector_index, k).await
    }

    async fn keyword_hits(&self, query: &str, k: usize) -> GraphResult<Vec<RetrievalResult>> {
        self.backend.keyword_search(query, &self.keyword_index, k).await
    }
}

/// Divide every score by the list maximum. Lists whose maximum is not
/// positive are returned unchanged.
pub fn normalize(mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let max = results.iter().map(|r| r.score).fold(f32::NEG_INFINITY, f32::max);
    if max > 0.0 {
        for result in &mut results {
            result.score /= max;
        }
    }
    results
}

/// Normalize each list, merge by `(source_id, index)` keeping the higher
/// score, then keep the best `k`.
pub fn fuse(lists: impl IntoIterator<Item = Vec<RetrievalResult>>, k: usize) -> Vec<RetrievalResult> {
    let mut merged: HashMap<(String, i64), RetrievalResult> = HashMap::new();
    for list in lists {
        for hit in normalize(list) {
            let key = (hit.source_id.clone(), hit.index);
            match merged.get_mut(&key) {
                Some(existing) if existing.score >= hit.score => {}
                Some(existing) => *existing = hit,
                None => {
                    merged.insert(key, hit);
                }
            }
        }
    }

    let mut fused: Vec<RetrievalResult> = merged.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.identity().cmp(&b.identity()))
    });
    fused.truncate(k);
    fused
}
