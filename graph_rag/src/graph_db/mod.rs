pub mod bolt;
pub mod memory;
pub mod neo4j_client;

pub use memory::InMemoryGraph;
pub use neo4j_client::Neo4jClient;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use kgrag_models::{Chunk, Community, Entity, ParentChunk, Relationship, RetrievalResult};
use serde::{Deserialize, Serialize};

use crate::errors::GraphResult;

pub const CHUNK_VECTOR_INDEX: &str = "chunk_embeddings";
pub const CHUNK_FULLTEXT_INDEX: &str = "chunk_fulltext";
pub const CHILD_VECTOR_INDEX: &str = "child_chunks";
pub const PARENT_FULLTEXT_INDEX: &str = "ftParentChunk";
pub const ENTITY_VECTOR_INDEX: &str = "entities";

/// A single record returned by a graph query, keyed by column name.
pub type Record = serde_json::Value;

/// Read access used by the retrieval strategies and the agent tools.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Nearest neighbours of `embedding` in the named vector index.
    async fn vector_search(
        &self,
        embedding: &[f32],
        index: &str,
        k: usize,
    ) -> GraphResult<Vec<RetrievalResult>>;

    /// Full-text matches for `text` in the named keyword index.
    async fn keyword_search(&self, text: &str, index: &str, k: usize) -> GraphResult<Vec<RetrievalResult>>;

    /// Run a parameterised graph query. `params` is a JSON object.
    async fn graph_query(&self, cypher: &str, params: serde_json::Value) -> GraphResult<Vec<Record>>;
}

/// The whole entity graph as stored, plus current community labels.
#[derive(Debug, Clone, Default)]
pub struct EntityGraph {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    /// Entity name to community label, for labelled entities only.
    pub labels: BTreeMap<String, i64>,
}

/// An entity as drawn in a graph visualisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    pub degree: usize,
    #[serde(default)]
    pub community: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub description: String,
    pub strength: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphView {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl EntityGraph {
    /// The `node_limit` best-connected entities and up to `edge_limit`
    /// relationships between them.
    pub fn view(&self, node_limit: usize, edge_limit: usize) -> GraphView {
        let mut degrees: BTreeMap<&str, usize> = BTreeMap::new();
        for rel in &self.relationships {
            *degrees.entry(rel.source.as_str()).or_default() += 1;
            *degrees.entry(rel.target.as_str()).or_default() += 1;
        }

        let mut nodes: Vec<GraphNode> = self
            .entities
            .iter()
            .map(|e| GraphNode {
                id: e.name.clone(),
                entity_type: e.entity_type.clone(),
                description: e.descriptions.first().cloned().unwrap_or_default(),
                degree: degrees.get(e.name.as_str()).copied().unwrap_or(0),
                community: self.labels.get(&e.name).copied(),
            })
            .collect();
        nodes.sort_by(|a, b| b.degree.cmp(&a.degree).then_with(|| a.id.cmp(&b.id)));
        nodes.truncate(node_limit);

        let shown: BTreeSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let edges = self
            .relationships
            .iter()
            .filter(|r| shown.contains(r.source.as_str()) && shown.contains(r.target.as_str()))
            .take(edge_limit)
            .map(|r| GraphEdge {
                source: r.source.clone(),
                target: r.target.clone(),
                description: r.description.clone(),
                strength: r.strength,
            })
            .collect();

        GraphView { nodes, edges }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStatistics {
    pub documents: u64,
    pub chunks: u64,
    pub entities: u64,
    pub relationships: u64,
    pub communities: u64,
}

/// Typed store operations of the ingestion, extraction and community pipelines.
#[async_trait]
pub trait KnowledgeGraph: Send + Sync {
    /// Create vector and full-text indexes plus uniqueness constraints.
    async fn ensure_indexes(&self, dimension: usize) -> GraphResult<()>;

    /// Merge entities by name, appending their descriptions. When `chunk_id`
    /// names a stored chunk, the chunk is linked to every entity.
    async fn upsert_entities(&self, entities: &[Entity], chunk_id: Option<&str>) -> GraphResult<()>;

    /// Always creates new edges; endpoints are merged by name.
    async fn create_relationships(&self, relationships: &[Relationship]) -> GraphResult<()>;

    async fn entity_graph(&self) -> GraphResult<EntityGraph>;

    /// Replace every community label and delete every stored community.
    async fn write_community_labels(&self, labels: &BTreeMap<String, i64>) -> GraphResult<()>;

    /// Overwrite the community with the same id and recreate its membership.
    async fn save_community(&self, community: &Community) -> GraphResult<()>;

    /// Communities rated at least `min_rating`, highest rating first.
    async fn communities_by_rating(&self, min_rating: f32) -> GraphResult<Vec<Community>>;

    async fn nearest_entities(&self, embedding: &[f32], k: usize) -> GraphResult<Vec<Entity>>;

    /// Chunk texts mentioning the entities, most co-mentions first.
    async fn linked_chunks(&self, entity_names: &[String], limit: usize) -> GraphResult<Vec<String>>;

    /// Communities containing any of the entities, highest rating first.
    async fn entity_communities(&self, entity_names: &[String], limit: usize) -> GraphResult<Vec<Community>>;

    /// Relationships whose endpoints are both in `entity_names`, strongest first.
    async fn internal_relationships(
        &self,
        entity_names: &[String],
        limit: usize,
    ) -> GraphResult<Vec<Relationship>>;

    async fn set_entity_summaries(&self, summaries: &[(String, String)]) -> GraphResult<()>;

    async fn set_entity_embeddings(&self, embeddings: &[(String, Vec<f32>)]) -> GraphResult<()>;

    async fn store_chunks(&self, document_id: &str, chunks: &[Chunk]) -> GraphResult<()>;

    async fn store_parent_chunks(&self, document_id: &str, parents: &[ParentChunk]) -> GraphResult<()>;

    /// Search child embeddings and return their parents, scored by the best child.
    async fn parent_search(&self, embedding: &[f32], k: usize) -> GraphResult<Vec<RetrievalResult>>;

    async fn statistics(&self) -> GraphResult<GraphStatistics>;

    /// Delete every node and relationship. Indexes and constraints survive.
    async fn reset(&self) -> GraphResult<()>;
}
