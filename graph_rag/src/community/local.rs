//! Entity-centred retrieval around the nearest entities to a question.

use kgrag_models::ConversationTurn;
use serde::{Deserialize, Serialize};

use super::CommunityService;
use crate::errors::GraphResult;
use crate::llm::GenerationOptions;

pub const NO_LOCAL_ANSWER: &str = "No relevant information found for this query.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSearchParams {
    pub k_entities: usize,
    pub top_chunks: usize,
    pub top_communities: usize,
    pub top_relationships: usize,
}

impl Default for LocalSearchParams {
    fn default() -> Self {
        Self {
            k_entities: 5,
            top_chunks: 3,
            top_communities: 3,
            top_relationships: 3,
        }
    }
}

/// Context gathered around the matched entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalContext {
    pub chunks: Vec<String>,
    pub reports: Vec<String>,
    pub relationships: Vec<String>,
    pub entities: Vec<String>,
}

impl LocalContext {
    fn render(&self) -> String {
        let section = |items: &[String]| {
            if items.is_empty() {
                "(none)".to_string()
            } else {
                items.iter().map(|i| format!("- {}", i)).collect::<Vec<_>>().join("\n")
            }
        };
        format!(
            "Chunks:\n{}\n\nCommunity Reports:\n{}\n\nRelationships:\n{}\n\nEntities:\n{}",
            section(&self.chunks),
            section(&self.reports),
            section(&self.relationships),
            section(&self.entities)
        )
    }
}

impl CommunityService {
    /// Gather chunk, community, relationship and entity context. Each source
    /// that fails contributes nothing. `None` when no entity matches.
    pub async fn local_context(&self, query: &str, params: LocalSearchParams) -> GraphResult<Option<LocalContext>> {
        let embedding = self.embedder.embed(query).await?;
        let entities = self.graph.nearest_entities(&embedding, params.k_entities).await?;
        if entities.is_empty() {
            return Ok(None);
        }
        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();

        let (chunks, communities, relationships) = tokio::join!(
            self.graph.linked_chunks(&names, params.top_chunks),
            self.graph.entity_communities(&names, params.top_communities),
            self.graph.internal_relationships(&names, params.top_relationships),
        );

        let context = LocalContext {
            chunks: chunks.unwrap_or_else(|e| {
                tracing::warn!("⚠️ Linked chunks unavailable: {}", e);
                Vec::new()
            }),
            reports: communities
                .unwrap_or_else(|e| {
                    tracing::warn!("⚠️ Entity communities unavailable: {}", e);
                    Vec::new()
                })
                .into_iter()
                .map(|c| c.summary)
                .collect(),
            relationships: relationships
                .unwrap_or_else(|e| {
                    tracing::warn!("⚠️ Internal relationships unavailable: {}", e);
                    Vec::new()
                })
                .into_iter()
                .map(|r| r.description)
                .collect(),
            entities: entities
                .iter()
                .map(|e| format!("{}: {}", e.name, e.display_description()))
                .collect(),
        };
        Ok(Some(context))
    }

    pub async fn local_search(&self, query: &str, params: LocalSearchParams) -> GraphResult<String> {
        let Some(context) = self.local_context(query, params).await? else {
            return Ok(NO_LOCAL_ANSWER.to_string());
        };
        tracing::info!(
            "🔍 Local search context: {} chunks, {} reports, {} relationships, {} entities",
            context.chunks.len(),
            context.reports.len(),
            context.relationships.len(),
            context.entities.len()
        );

        let prompt = format!(
            "You are a helpful assistant responding to questions about data in the provided context.\n\n\
             Generate a comprehensive response that responds to the user's question, summarizing all \
             relevant information from the context data.\n\n\
             If you don't know the answer, just say so. Do not make anything up.\n\n\
             Context Data:\n{}\n\nUser Question: {}\n\nResponse:",
            context.render(),
            query
        );
        self.generator
            .generate(&[ConversationTurn::user(prompt)], GenerationOptions::default())
            .await
    }
}
