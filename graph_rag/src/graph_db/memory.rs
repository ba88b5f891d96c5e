//! In-process store implementing both backend traits.
//!
//! Used by the tests and for offline runs. It mirrors the Neo4j semantics the
//! pipelines rely on (append-only descriptions, always-created relationships,
//! overwrite-by-id communities) but cannot execute Cypher.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use kgrag_models::{Chunk, Community, Entity, ParentChunk, Relationship, RetrievalResult};
use parking_lot::RwLock;

use super::{
    EntityGraph, GraphStatistics, KnowledgeGraph, Record, RetrievalBackend, CHILD_VECTOR_INDEX,
    CHUNK_FULLTEXT_INDEX, CHUNK_VECTOR_INDEX, ENTITY_VECTOR_INDEX, PARENT_FULLTEXT_INDEX,
};
use crate::errors::{GraphError, GraphResult};

#[derive(Default)]
struct State {
    entities: BTreeMap<String, Entity>,
    relationships: Vec<Relationship>,
    labels: BTreeMap<String, i64>,
    communities: BTreeMap<i64, Community>,
    documents: BTreeSet<String>,
    chunks: BTreeMap<String, Chunk>,
    chunk_entities: BTreeMap<String, BTreeSet<String>>,
    parents: BTreeMap<String, ParentChunk>,
}

#[derive(Default)]
pub struct InMemoryGraph {
    state: RwLock<State>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Communities currently stored, in id order.
    pub fn communities(&self) -> Vec<Community> {
        self.state.read().communities.values().cloned().collect()
    }

    pub fn entity(&self, name: &str) -> Option<Entity> {
        self.state.read().entities.get(name).cloned()
    }
}

/// Cosine similarity mapped to `[0, 1]` the way Neo4j vector indexes report it.
pub fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (1.0 + dot / (norm_a * norm_b)) / 2.0
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Sum of the in-document frequencies of each distinct query term.
fn term_score(query: &str, text: &str) -> f32 {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in tokens(text) {
        *counts.entry(token).or_default() += 1;
    }
    let terms: BTreeSet<String> = tokens(query).collect();
    terms.iter().map(|t| counts.get(t).copied().unwrap_or(0) as f32).sum()
}

fn rank(mut hits: Vec<RetrievalResult>, k: usize) -> Vec<RetrievalResult> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.identity().cmp(&b.identity()))
    });
    hits.truncate(k);
    hits
}

fn by_rating(a: &Community, b: &Community) -> std::cmp::Ordering {
    b.rating
        .total_cmp(&a.rating)
        .then_with(|| a.community_id.cmp(&b.community_id))
}

#[async_trait]
impl RetrievalBackend for InMemoryGraph {
    async fn vector_search(
        &self,
        embedding: &[f32],
        index: &str,
        k: usize,
    ) -> GraphResult<Vec<RetrievalResult>> {
        let state = self.state.read();
        let hits: Vec<RetrievalResult> = match index {
            CHUNK_VECTOR_INDEX => state
                .chunks
                .values()
                .filter(|c| !c.embedding.is_empty())
                .map(|c| RetrievalResult::new(&c.text, cosine_score(embedding, &c.embedding), &c.id, c.index))
                .collect(),
            CHILD_VECTOR_INDEX => state
                .parents
                .values()
                .flat_map(|p| p.children.iter())
                .map(|c| RetrievalResult::new(&c.text, cosine_score(embedding, &c.embedding), &c.id, c.index))
                .collect(),
            ENTITY_VECTOR_INDEX => state
                .entities
                .values()
                .filter_map(|e| {
                    let vector = e.embedding.as_ref()?;
                    Some(RetrievalResult::new(
                        e.display_description(),
                        cosine_score(embedding, vector),
                        &e.name,
                        0,
                    ))
                })
                .collect(),
            other => return Err(GraphError::InvalidInput(format!("unknown vector index {}", other))),
        };
        Ok(rank(hits, k))
    }

    async fn keyword_search(&self, text: &str, index: &str, k: usize) -> GraphResult<Vec<RetrievalResult>> {
        let state = self.state.read();
        let hits: Vec<RetrievalResult> = match index {
            CHUNK_FULLTEXT_INDEX => state
                .chunks
                .values()
                .map(|c| RetrievalResult::new(&c.text, term_score(text, &c.text), &c.id, c.index))
                .collect(),
            PARENT_FULLTEXT_INDEX => state
                .parents
                .values()
                .map(|p| RetrievalResult::new(&p.text, term_score(text, &p.text), &p.id, 0))
                .collect(),
            other => return Err(GraphError::InvalidInput(format!("unknown full-text index {}", other))),
        };
        Ok(rank(hits.into_iter().filter(|h| h.score > 0.0).collect(), k))
    }

    async fn graph_query(&self, _cypher: &str, _params: serde_json::Value) -> GraphResult<Vec<Record>> {
        Err(GraphError::Unsupported("the in-memory graph cannot run Cypher".to_string()))
    }
}

#[async_trait]
impl KnowledgeGraph for InMemoryGraph {
    async fn ensure_indexes(&self, _dimension: usize) -> GraphResult<()> {
        Ok(())
    }

    async fn upsert_entities(&self, entities: &[Entity], chunk_id: Option<&str>) -> GraphResult<()> {
        let mut state = self.state.write();
        for entity in entities {
            let stored = state
                .entities
                .entry(entity.name.clone())
                .or_insert_with(|| Entity::new(&entity.name, &entity.entity_type));
            stored.entity_type = entity.entity_type.clone();
            stored.descriptions.extend(entity.descriptions.iter().cloned());
        }
        if let Some(chunk_id) = chunk_id.filter(|id| state.chunks.contains_key(*id)) {
            let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
            state
                .chunk_entities
                .entry(chunk_id.to_string())
                .or_default()
                .extend(names);
        }
        Ok(())
    }

    async fn create_relationships(&self, relationships: &[Relationship]) -> GraphResult<()> {
        let mut state = self.state.write();
        for rel in relationships {
            for name in [&rel.source, &rel.target] {
                if !state.entities.contains_key(name) {
                    state.entities.insert(name.clone(), Entity::new(name, "UNKNOWN"));
                }
            }
            state.relationships.push(rel.clone());
        }
        Ok(())
    }

    async fn entity_graph(&self) -> GraphResult<EntityGraph> {
        let state = self.state.read();
        Ok(EntityGraph {
            entities: state.entities.values().cloned().collect(),
            relationships: state.relationships.clone(),
            labels: state.labels.clone(),
        })
    }

    async fn write_community_labels(&self, labels: &BTreeMap<String, i64>) -> GraphResult<()> {
        let mut state = self.state.write();
        let known: BTreeMap<String, i64> = labels
            .iter()
            .filter(|(name, _)| state.entities.contains_key(*name))
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        state.labels = known;
        state.communities.clear();
        Ok(())
    }

    async fn save_community(&self, community: &Community) -> GraphResult<()> {
        let mut state = self.state.write();
        let mut stored = community.clone();
        stored.members.retain(|name| state.entities.contains_key(name));
        state.communities.insert(community.community_id, stored);
        Ok(())
    }

    async fn communities_by_rating(&self, min_rating: f32) -> GraphResult<Vec<Community>> {
        let state = self.state.read();
        let mut communities: Vec<Community> = state
            .communities
            .values()
            .filter(|c| c.rating >= min_rating)
            .cloned()
            .collect();
        communities.sort_by(by_rating);
        Ok(communities)
    }

    async fn nearest_entities(&self, embedding: &[f32], k: usize) -> GraphResult<Vec<Entity>> {
        let hits = self.vector_search(embedding, ENTITY_VECTOR_INDEX, k).await?;
        let state = self.state.read();
        Ok(hits
            .iter()
            .filter_map(|hit| state.entities.get(&hit.source_id).cloned())
            .collect())
    }

    async fn linked_chunks(&self, entity_names: &[String], limit: usize) -> GraphResult<Vec<String>> {
        let state = self.state.read();
        let mut ranked: Vec<(usize, &String)> = state
            .chunk_entities
            .iter()
            .map(|(chunk_id, names)| (entity_names.iter().filter(|n| names.contains(*n)).count(), chunk_id))
            .filter(|(freq, _)| *freq > 0)
            .collect();
        ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        Ok(ranked
            .into_iter()
            .filter_map(|(_, id)| state.chunks.get(id).map(|c| c.text.clone()))
            .take(limit)
            .collect())
    }

    async fn entity_communities(&self, entity_names: &[String], limit: usize) -> GraphResult<Vec<Community>> {
        let state = self.state.read();
        let mut communities: Vec<Community> = state
            .communities
            .values()
            .filter(|c| entity_names.iter().any(|n| c.references(n)))
            .cloned()
            .collect();
        communities.sort_by(by_rating);
        communities.truncate(limit);
        Ok(communities)
    }

    async fn internal_relationships(
        &self,
        entity_names: &[String],
        limit: usize,
    ) -> GraphResult<Vec<Relationship>> {
        let names: BTreeSet<&String> = entity_names.iter().collect();
        let state = self.state.read();
        let mut relationships: Vec<Relationship> = state
            .relationships
            .iter()
            .filter(|r| names.contains(&r.source) && names.contains(&r.target))
            .cloned()
            .collect();
        relationships.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        relationships.truncate(limit);
        Ok(relationships)
    }

    async fn set_entity_summaries(&self, summaries: &[(String, String)]) -> GraphResult<()> {
        let mut state = self.state.write();
        for (name, summary) in summaries {
            if let Some(entity) = state.entities.get_mut(name) {
                entity.summary = Some(summary.clone());
            }
        }
        Ok(())
    }

    async fn set_entity_embeddings(&self, embeddings: &[(String, Vec<f32>)]) -> GraphResult<()> {
        let mut state = self.state.write();
        for (name, embedding) in embeddings {
            if let Some(entity) = state.entities.get_mut(name) {
                entity.embedding = Some(embedding.clone());
            }
        }
        Ok(())
    }

    async fn store_chunks(&self, document_id: &str, chunks: &[Chunk]) -> GraphResult<()> {
        let mut state = self.state.write();
        state.documents.insert(document_id.to_string());
        for chunk in chunks {
            state.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        Ok(())
    }

    async fn store_parent_chunks(&self, document_id: &str, parents: &[ParentChunk]) -> GraphResult<()> {
        let mut state = self.state.write();
        state.documents.insert(document_id.to_string());
        for parent in parents {
            state.parents.insert(parent.id.clone(), parent.clone());
        }
        Ok(())
    }

    async fn parent_search(&self, embedding: &[f32], k: usize) -> GraphResult<Vec<RetrievalResult>> {
        let state = self.state.read();
        let mut children: Vec<(f32, &ParentChunk)> = state
            .parents
            .values()
            .flat_map(|p| p.children.iter().map(move |c| (cosine_score(embedding, &c.embedding), p)))
            .collect();
        children.sort_by(|a, b| b.0.total_cmp(&a.0));
        children.truncate(k * 4);

        let mut best: BTreeMap<&str, (f32, &ParentChunk)> = BTreeMap::new();
        for (score, parent) in children {
            let entry = best.entry(parent.id.as_str()).or_insert((score, parent));
            if score > entry.0 {
                entry.0 = score;
            }
        }
        let hits = best
            .into_values()
            .map(|(score, parent)| RetrievalResult::new(&parent.text, score, &parent.id, 0))
            .collect();
        Ok(rank(hits, k))
    }

    async fn statistics(&self) -> GraphResult<GraphStatistics> {
        let state = self.state.read();
        Ok(GraphStatistics {
            documents: state.documents.len() as u64,
            chunks: state.chunks.len() as u64,
            entities: state.entities.len() as u64,
            relationships: state.relationships.len() as u64,
            communities: state.communities.len() as u64,
        })
    }

    async fn reset(&self) -> GraphResult<()> {
        *self.state.write() = State::default();
        Ok(())
    }
}
