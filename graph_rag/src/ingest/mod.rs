//! Document ingestion: chunk, embed and store.

pub mod chunking;

pub use chunking::{chunk_text, parent_child_chunks, split_by_titles};

use std::sync::Arc;
use std::time::Instant;

use kgrag_config::RetrievalConfig;
use kgrag_models::{Chunk, ParentChunk};
use kgrag_observability::log_document_ingested;

use crate::errors::{GraphError, GraphResult};
use crate::graph_db::KnowledgeGraph;
use crate::llm::Embedder;

const SERVICE: &str = "ingest";

pub struct DocumentIngestor {
    graph: Arc<dyn KnowledgeGraph>,
    embedder: Arc<dyn Embedder>,
    chunk_size: usize,
    overlap: usize,
    parent_size: usize,
}

impl DocumentIngestor {
    pub fn new(graph: Arc<dyn KnowledgeGraph>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            graph,
            embedder,
            chunk_size: chunking::DEFAULT_CHUNK_SIZE,
            overlap: chunking::DEFAULT_OVERLAP,
            parent_size: chunking::DEFAULT_PARENT_SIZE,
        }
    }

    pub fn with_config(mut self, config: &RetrievalConfig) -> Self {
        self.chunk_size = config.chunk_size;
        self.overlap = config.chunk_overlap;
        self
    }

    async fn embed_all(&self, owner_id: &str, texts: Vec<String>) -> GraphResult<Vec<Chunk>> {
        let mut chunks = Vec::with_capacity(texts.len());
        for (index, text) in texts.into_iter().enumerate() {
            let embedding = self.embedder.embed(&text).await?;
            chunks.push(Chunk::new(owner_id, index, text, embedding));
        }
        Ok(chunks)
    }

    /// Store `text` as embedded `Chunk` nodes. Returns the stored chunks.
    pub async fn ingest_text(&self, document_id: &str, text: &str) -> GraphResult<Vec<Chunk>> {
        if document_id.trim().is_empty() {
            return Err(GraphError::InvalidInput("document id is empty".to_string()));
        }
        let start = Instant::now();
        tracing::info!("🔷 Ingesting document {}", document_id);

        let chunks = self
            .embed_all(document_id, chunk_text(text, self.chunk_size, self.overlap))
            .await?;
        self.graph.store_chunks(document_id, &chunks).await?;

        log_document_ingested(SERVICE, document_id, chunks.len(), start.elapsed().as_millis() as u64);
        Ok(chunks)
    }

    /// Store `text` as parent sections with embedded children. Returns how
    /// many parents were stored.
    pub async fn ingest_parent_child(&self, document_id: &str, text: &str) -> GraphResult<usize> {
        if document_id.trim().is_empty() {
            return Err(GraphError::InvalidInput("document id is empty".to_string()));
        }
        let start = Instant::now();

        let mut parents = Vec::new();
        for (i, (parent_text, children)) in parent_child_chunks(text, self.parent_size, self.chunk_size, self.overlap)
            .into_iter()
            .enumerate()
        {
            let id = format!("{}-parent-{}", document_id, i);
            let children = self.embed_all(&id, children).await?;
            parents.push(ParentChunk {
                id,
                document_id: document_id.to_string(),
                text: parent_text,
                children,
            });
        }
        self.graph.store_parent_chunks(document_id, &parents).await?;

        let child_count: usize = parents.iter().map(|p| p.children.len()).sum();
        log_document_ingested(SERVICE, document_id, child_count, start.elapsed().as_millis() as u64);
        Ok(parents.len())
    }
}
