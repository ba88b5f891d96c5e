#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use graph_rag::graph_db::{InMemoryGraph, Record, RetrievalBackend};
use graph_rag::llm::{Embedder, GenerationOptions, TextGenerator};
use graph_rag::{GraphError, GraphResult};
use kgrag_models::{ConversationTurn, RetrievalResult};
use parking_lot::Mutex;

/// Replies with a fixed script, one entry per call, and records every prompt.
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<GraphResult<String>>>,
    prompts: Mutex<Vec<Vec<ConversationTurn>>>,
}

impl ScriptedGenerator {
    pub fn new(replies: &[&str]) -> Self {
        Self::from_results(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn from_results(replies: Vec<GraphResult<String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    /// All message contents of call `n`, joined.
    pub fn prompt(&self, n: usize) -> String {
        self.prompts.lock()[n]
            .iter()
            .map(|t| t.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, messages: &[ConversationTurn], _options: GenerationOptions) -> GraphResult<String> {
        self.prompts.lock().push(messages.to_vec());
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(GraphError::Llm("script exhausted".to_string())))
    }
}

/// Replies computed from the joined prompt text.
pub struct FnGenerator<F> {
    reply: F,
    calls: AtomicUsize,
}

impl<F> FnGenerator<F>
where
    F: Fn(&str) -> GraphResult<String> + Send + Sync,
{
    pub fn new(reply: F) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> TextGenerator for FnGenerator<F>
where
    F: Fn(&str) -> GraphResult<String> + Send + Sync,
{
    async fn generate(&self, messages: &[ConversationTurn], _options: GenerationOptions) -> GraphResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt: Vec<&str> = messages.iter().map(|t| t.content.as_str()).collect();
        (self.reply)(&prompt.join("\n"))
    }
}

pub const DIMENSION: usize = 32;

/// Bag-of-words embedding: each lowercase token bumps one hashed bucket.
#[derive(Default)]
pub struct HashEmbedder {
    calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSION];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let bucket = token
                .to_lowercase()
                .bytes()
                .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize));
            vector[bucket % DIMENSION] += 1.0;
        }
        vector
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> GraphResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }
}

/// In-memory backend whose vector or keyword side can be switched off.
pub struct FlakyBackend {
    pub inner: InMemoryGraph,
    pub vector_down: bool,
    pub keyword_down: bool,
    calls: AtomicUsize,
}

impl FlakyBackend {
    pub fn new(inner: InMemoryGraph, vector_down: bool, keyword_down: bool) -> Self {
        Self {
            inner,
            vector_down,
            keyword_down,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalBackend for FlakyBackend {
    async fn vector_search(&self, embedding: &[f32], index: &str, k: usize) -> GraphResult<Vec<RetrievalResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.vector_down {
            return Err(GraphError::Neo4j("vector index unavailable".to_string()));
        }
        self.inner.vector_search(embedding, index, k).await
    }

    async fn keyword_search(&self, text: &str, index: &str, k: usize) -> GraphResult<Vec<RetrievalResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.keyword_down {
            return Err(GraphError::Neo4j("full-text index unavailable".to_string()));
        }
        self.inner.keyword_search(text, index, k).await
    }

    async fn graph_query(&self, cypher: &str, params: serde_json::Value) -> GraphResult<Vec<Record>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.graph_query(cypher, params).await
    }
}
