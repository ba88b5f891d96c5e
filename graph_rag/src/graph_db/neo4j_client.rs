use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kgrag_config::Neo4jConfig;
use kgrag_models::{Chunk, Community, Entity, ParentChunk, Relationship, RetrievalResult};
use kgrag_observability::log_db;
use neo4rs::{query, ConfigBuilder, Graph, Query, Row};
use serde_json::json;

use super::bolt::{bind_params, escape_lucene};
use super::{
    EntityGraph, GraphStatistics, KnowledgeGraph, Record, RetrievalBackend, CHILD_VECTOR_INDEX,
    CHUNK_FULLTEXT_INDEX, CHUNK_VECTOR_INDEX, ENTITY_VECTOR_INDEX, PARENT_FULLTEXT_INDEX,
};
use crate::errors::{GraphError, GraphResult};

const COMMUNITY_COLUMNS: &str = "c.communityId AS community_id, \
     coalesce(c.title, '') AS title, \
     coalesce(c.summary, '') AS summary, \
     toFloat(coalesce(c.rating, 0.0)) AS rating, \
     coalesce(c.rating_explanation, '') AS rating_explanation, \
     coalesce(c.findings, []) AS findings";

/// Run before relabelling: a recalculation leaves no community from the
/// previous run behind.
const RESET_COMMUNITY_QUERIES: [&str; 2] = [
    "MATCH (e:__Entity__) REMOVE e.louvain",
    "MATCH (c:__Community__) DETACH DELETE c",
];

/// Neo4j client compatible with both local Neo4j and Neo4j AuraDB
pub struct Neo4jClient {
    graph: Arc<Graph>,
    uri: String,
    timeout: Duration,
}

impl Neo4jClient {
    /// Connect and verify the connection with a trivial query.
    ///
    /// Supports local `bolt://localhost:7687` as well as AuraDB
    /// `neo4j+s://xxxxx.databases.neo4j.io` URIs.
    pub async fn connect(config: &Neo4jConfig) -> GraphResult<Self> {
        tracing::info!("🔷 Connecting to Neo4j at: {}", config.uri);

        let neo4j_config = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .db(config.database.as_str())
            .fetch_size(500)
            .max_connections(config.max_connections)
            .build()
            .map_err(|e| GraphError::Neo4j(format!("Failed to build Neo4j config: {}", e)))?;

        let graph = Graph::connect(neo4j_config)
            .await
            .map_err(|e| GraphError::Neo4j(format!("Failed to connect to Neo4j: {}", e)))?;

        let client = Self {
            graph: Arc::new(graph),
            uri: config.uri.clone(),
            timeout: config.query_timeout,
        };

        let check = client.fetch(query("RETURN 1 AS test")).await?;
        if !check.is_empty() {
            tracing::info!("✅ Neo4j connection established successfully");
        }

        Ok(client)
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Check if connected to AuraDB
    pub fn is_aura(&self) -> bool {
        self.uri.contains("neo4j.io") || self.uri.starts_with("neo4j+s://") || self.uri.starts_with("neo4j+ssc://")
    }

    /// Execute a query and collect every row, bounded by the query timeout.
    async fn fetch(&self, q: Query) -> GraphResult<Vec<Row>> {
        let graph = self.graph.clone();
        let work = async move {
            let mut result = graph.execute(q).await.map_err(|e| GraphError::Neo4j(e.to_string()))?;
            let mut rows = Vec::new();
            while let Some(row) = result.next().await.map_err(|e| GraphError::Neo4j(e.to_string()))? {
                rows.push(row);
            }
            Ok::<_, GraphError>(rows)
        };
        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| GraphError::Timeout(self.timeout))?
    }

    /// Run a write query that returns nothing.
    async fn run(&self, q: Query) -> GraphResult<()> {
        tokio::time::timeout(self.timeout, self.graph.run(q))
            .await
            .map_err(|_| GraphError::Timeout(self.timeout))?
            .map_err(|e| GraphError::Neo4j(e.to_string()))
    }

    /// Run several writes in one transaction.
    async fn run_in_transaction(&self, queries: Vec<Query>) -> GraphResult<()> {
        let graph = self.graph.clone();
        let work = async move {
            let mut txn = graph.start_txn().await.map_err(|e| GraphError::Neo4j(e.to_string()))?;
            txn.run_queries(queries).await.map_err(|e| GraphError::Neo4j(e.to_string()))?;
            txn.commit().await.map_err(|e| GraphError::Neo4j(e.to_string()))
        };
        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| GraphError::Timeout(self.timeout))?
    }

    fn hits(rows: Vec<Row>) -> GraphResult<Vec<RetrievalResult>> {
        rows.into_iter()
            .map(|row| {
                Ok(RetrievalResult::new(
                    get::<String>(&row, "text")?,
                    get::<f64>(&row, "score")? as f32,
                    get::<String>(&row, "id")?,
                    get::<i64>(&row, "index")?,
                ))
            })
            .collect()
    }

    fn entity(row: &Row) -> GraphResult<Entity> {
        Ok(Entity {
            name: get(row, "name")?,
            entity_type: get(row, "type")?,
            descriptions: get(row, "descriptions")?,
            summary: get(row, "summary")?,
            embedding: None,
        })
    }

    fn relationship(row: &Row) -> GraphResult<Relationship> {
        Ok(Relationship::new(
            get::<String>(row, "source")?,
            get::<String>(row, "target")?,
            get::<String>(row, "description")?,
            get::<f64>(row, "strength")? as f32,
        ))
    }

    fn community(row: &Row) -> GraphResult<Community> {
        let members: Vec<String> = get(row, "members")?;
        Ok(Community {
            community_id: get(row, "community_id")?,
            title: get(row, "title")?,
            summary: get(row, "summary")?,
            rating: get::<f64>(row, "rating")? as f32,
            rating_explanation: get(row, "rating_explanation")?,
            findings: get(row, "findings")?,
            members: members.into_iter().collect(),
        })
    }
}

fn get<T: serde::de::DeserializeOwned>(row: &Row, column: &str) -> GraphResult<T> {
    row.get::<T>(column)
        .map_err(|e| GraphError::Neo4j(format!("column {}: {}", column, e)))
}

fn count(rows: &[Row], column: &str) -> GraphResult<u64> {
    match rows.first() {
        Some(row) => Ok(get::<i64>(row, column)?.max(0) as u64),
        None => Ok(0),
    }
}

#[async_trait]
impl RetrievalBackend for Neo4jClient {
    async fn vector_search(
        &self,
        embedding: &[f32],
        index: &str,
        k: usize,
    ) -> GraphResult<Vec<RetrievalResult>> {
        log_db!("VECTOR", index, k);
        let q = bind_params(
            query(
                "CALL db.index.vector.queryNodes($index, $k, $embedding) YIELD node, score \
                 RETURN coalesce(node.text, node.summary, node.name, '') AS text, score, \
                        coalesce(node.id, node.name, '') AS id, coalesce(node.index, 0) AS index \
                 ORDER BY score DESC",
            ),
            &json!({ "index": index, "k": k, "embedding": embedding }),
        );
        Self::hits(self.fetch(q).await?)
    }

    async fn keyword_search(&self, text: &str, index: &str, k: usize) -> GraphResult<Vec<RetrievalResult>> {
        log_db!("FULLTEXT", index, k);
        let q = bind_params(
            query(
                "CALL db.index.fulltext.queryNodes($index, $query, {limit: $k}) YIELD node, score \
                 RETURN coalesce(node.text, '') AS text, score, \
                        coalesce(node.id, '') AS id, coalesce(node.index, 0) AS index \
                 ORDER BY score DESC LIMIT $k",
            ),
            &json!({ "index": index, "query": escape_lucene(text), "k": k }),
        );
        Self::hits(self.fetch(q).await?)
    }

    async fn graph_query(&self, cypher: &str, params: serde_json::Value) -> GraphResult<Vec<Record>> {
        let rows = self.fetch(bind_params(query(cypher), &params)).await?;
        rows.into_iter()
            .map(|row| row.to::<serde_json::Value>().map_err(|e| GraphError::Neo4j(e.to_string())))
            .collect()
    }
}

#[async_trait]
impl KnowledgeGraph for Neo4jClient {
    async fn ensure_indexes(&self, dimension: usize) -> GraphResult<()> {
        let vector = |name: &str, label: &str| {
            format!(
                "CREATE VECTOR INDEX {} IF NOT EXISTS FOR (n:{}) ON (n.embedding) \
                 OPTIONS {{indexConfig: {{`vector.dimensions`: {}, `vector.similarity_function`: 'cosine'}}}}",
                name, label, dimension
            )
        };
        let statements = vec![
            "CREATE CONSTRAINT entity_name IF NOT EXISTS FOR (e:__Entity__) REQUIRE e.name IS UNIQUE".to_string(),
            "CREATE CONSTRAINT community_id IF NOT EXISTS FOR (c:__Community__) REQUIRE c.communityId IS UNIQUE"
                .to_string(),
            "CREATE CONSTRAINT chunk_id IF NOT EXISTS FOR (c:Chunk) REQUIRE c.id IS UNIQUE".to_string(),
            vector(CHUNK_VECTOR_INDEX, "Chunk"),
            vector(CHILD_VECTOR_INDEX, "Child"),
            vector(ENTITY_VECTOR_INDEX, "__Entity__"),
            format!(
                "CREATE FULLTEXT INDEX {} IF NOT EXISTS FOR (c:Chunk) ON EACH [c.text]",
                CHUNK_FULLTEXT_INDEX
            ),
            format!(
                "CREATE FULLTEXT INDEX {} IF NOT EXISTS FOR (p:Parent) ON EACH [p.text]",
                PARENT_FULLTEXT_INDEX
            ),
        ];
        for statement in statements {
            self.run(query(&statement)).await?;
        }
        tracing::info!("✅ Indexes ensured (dimension {})", dimension);
        Ok(())
    }

    async fn upsert_entities(&self, entities: &[Entity], chunk_id: Option<&str>) -> GraphResult<()> {
        if entities.is_empty() {
            return Ok(());
        }
        log_db!("MERGE", "__Entity__", entities.len());
        let rows: Vec<_> = entities
            .iter()
            .map(|e| json!({ "name": e.name, "type": e.entity_type, "descriptions": e.descriptions }))
            .collect();
        let q = bind_params(
            query(
                "UNWIND $entities AS entity \
                 MERGE (e:__Entity__ {name: entity.name}) \
                 SET e.type = entity.type, \
                     e.description = coalesce(e.description, []) + entity.descriptions \
                 WITH e \
                 OPTIONAL MATCH (c:Chunk {id: $chunk_id}) \
                 FOREACH (_ IN CASE WHEN c IS NULL THEN [] ELSE [1] END | MERGE (c)-[:HAS_ENTITY]->(e))",
            ),
            &json!({ "entities": rows, "chunk_id": chunk_id }),
        );
        self.run(q).await
    }

    async fn create_relationships(&self, relationships: &[Relationship]) -> GraphResult<()> {
        if relationships.is_empty() {
            return Ok(());
        }
        log_db!("CREATE", "RELATIONSHIP", relationships.len());
        let q = bind_params(
            query(
                "UNWIND $relationships AS rel \
                 MERGE (s:__Entity__ {name: rel.source}) \
                 MERGE (t:__Entity__ {name: rel.target}) \
                 CREATE (s)-[:RELATIONSHIP {description: rel.description, strength: rel.strength}]->(t)",
            ),
            &json!({ "relationships": relationships }),
        );
        self.run(q).await
    }

    async fn entity_graph(&self) -> GraphResult<EntityGraph> {
        let entity_rows = self
            .fetch(query(
                "MATCH (e:__Entity__) \
                 RETURN e.name AS name, coalesce(e.type, 'UNKNOWN') AS type, \
                        coalesce(e.description, []) AS descriptions, e.summary AS summary, \
                        e.louvain AS louvain \
                 ORDER BY name",
            ))
            .await?;
        let relationship_rows = self
            .fetch(query(
                "MATCH (s:__Entity__)-[r:RELATIONSHIP]->(t:__Entity__) \
                 RETURN s.name AS source, t.name AS target, coalesce(r.description, '') AS description, \
                        toFloat(coalesce(r.strength, 5.0)) AS strength",
            ))
            .await?;

        let mut graph = EntityGraph::default();
        for row in &entity_rows {
            let entity = Self::entity(row)?;
            if let Some(label) = get::<Option<i64>>(row, "louvain")? {
                graph.labels.insert(entity.name.clone(), label);
            }
            graph.entities.push(entity);
        }
        graph.relationships = relationship_rows
            .iter()
            .map(Self::relationship)
            .collect::<GraphResult<_>>()?;
        Ok(graph)
    }

    async fn write_community_labels(&self, labels: &BTreeMap<String, i64>) -> GraphResult<()> {
        log_db!("SET", "__Entity__.louvain", labels.len());
        let rows: Vec<_> = labels
            .iter()
            .map(|(name, community)| json!({ "name": name, "community": community }))
            .collect();
        let mut statements: Vec<Query> = RESET_COMMUNITY_QUERIES.iter().map(|q| query(q)).collect();
        statements.push(bind_params(
                query(
                    "UNWIND $rows AS row \
                     MATCH (e:__Entity__ {name: row.name}) \
                     SET e.louvain = row.community",
                ),
                &json!({ "rows": rows }),
            ));
        self.run_in_transaction(statements).await
    }

    async fn save_community(&self, community: &Community) -> GraphResult<()> {
        log_db!("MERGE", "__Community__");
        let params = json!({
            "id": community.community_id,
            "title": community.title,
            "summary": community.summary,
            "rating": community.rating,
            "rating_explanation": community.rating_explanation,
            "findings": community.findings,
            "members": community.members,
        });
        self.run_in_transaction(vec![
            bind_params(
                query(
                    "MERGE (c:__Community__ {communityId: $id}) \
                     SET c.title = $title, c.summary = $summary, c.rating = $rating, \
                         c.rating_explanation = $rating_explanation, c.findings = $findings",
                ),
                &params,
            ),
            bind_params(
                query("MATCH (:__Entity__)-[r:IN_COMMUNITY]->(:__Community__ {communityId: $id}) DELETE r"),
                &params,
            ),
            bind_params(
                query(
                    "MATCH (c:__Community__ {communityId: $id}) \
                     UNWIND $members AS name \
                     MATCH (e:__Entity__ {name: name}) \
                     MERGE (e)-[:IN_COMMUNITY]->(c)",
                ),
                &params,
            ),
        ])
        .await
    }

    async fn communities_by_rating(&self, min_rating: f32) -> GraphResult<Vec<Community>> {
        let cypher = format!(
            "MATCH (c:__Community__) WHERE c.rating >= $rating \
             OPTIONAL MATCH (e:__Entity__)-[:IN_COMMUNITY]->(c) \
             WITH c, collect(e.name) AS members \
             RETURN {}, members ORDER BY rating DESC, community_id",
            COMMUNITY_COLUMNS
        );
        let rows = self
            .fetch(bind_params(query(&cypher), &json!({ "rating": min_rating })))
            .await?;
        rows.iter().map(Self::community).collect()
    }

    async fn nearest_entities(&self, embedding: &[f32], k: usize) -> GraphResult<Vec<Entity>> {
        let q = bind_params(
            query(
                "CALL db.index.vector.queryNodes($index, $k, $embedding) YIELD node, score \
                 RETURN node.name AS name, coalesce(node.type, 'UNKNOWN') AS type, \
                        coalesce(node.description, []) AS descriptions, node.summary AS summary \
                 ORDER BY score DESC",
            ),
            &json!({ "index": ENTITY_VECTOR_INDEX, "k": k, "embedding": embedding }),
        );
        let rows = self.fetch(q).await?;
        rows.iter().map(Self::entity).collect()
    }

    async fn linked_chunks(&self, entity_names: &[String], limit: usize) -> GraphResult<Vec<String>> {
        let q = bind_params(
            query(
                "MATCH (c:Chunk)-[:HAS_ENTITY]->(e:__Entity__) WHERE e.name IN $names \
                 WITH c, count(DISTINCT e) AS freq \
                 RETURN c.text AS text ORDER BY freq DESC, c.id LIMIT $limit",
            ),
            &json!({ "names": entity_names, "limit": limit }),
        );
        let rows = self.fetch(q).await?;
        rows.iter().map(|row| get::<String>(row, "text")).collect()
    }

    async fn entity_communities(&self, entity_names: &[String], limit: usize) -> GraphResult<Vec<Community>> {
        let cypher = format!(
            "MATCH (e:__Entity__)-[:IN_COMMUNITY]->(c:__Community__) WHERE e.name IN $names \
             WITH DISTINCT c \
             OPTIONAL MATCH (m:__Entity__)-[:IN_COMMUNITY]->(c) \
             WITH c, collect(m.name) AS members \
             RETURN {}, members ORDER BY rating DESC, community_id LIMIT $limit",
            COMMUNITY_COLUMNS
        );
        let rows = self
            .fetch(bind_params(
                query(&cypher),
                &json!({ "names": entity_names, "limit": limit }),
            ))
            .await?;
        rows.iter().map(Self::community).collect()
    }

    async fn internal_relationships(
        &self,
        entity_names: &[String],
        limit: usize,
    ) -> GraphResult<Vec<Relationship>> {
        let q = bind_params(
            query(
                "MATCH (s:__Entity__)-[r:RELATIONSHIP]->(t:__Entity__) \
                 WHERE s.name IN $names AND t.name IN $names \
                 RETURN s.name AS source, t.name AS target, coalesce(r.description, '') AS description, \
                        toFloat(coalesce(r.strength, 5.0)) AS strength \
                 ORDER BY strength DESC LIMIT $limit",
            ),
            &json!({ "names": entity_names, "limit": limit }),
        );
        let rows = self.fetch(q).await?;
        rows.iter().map(Self::relationship).collect()
    }

    async fn set_entity_summaries(&self, summaries: &[(String, String)]) -> GraphResult<()> {
        log_db!("SET", "__Entity__.summary", summaries.len());
        let rows: Vec<_> = summaries
            .iter()
            .map(|(name, summary)| json!({ "name": name, "summary": summary }))
            .collect();
        let q = bind_params(
            query("UNWIND $rows AS row MATCH (e:__Entity__ {name: row.name}) SET e.summary = row.summary"),
            &json!({ "rows": rows }),
        );
        self.run(q).await
    }

    async fn set_entity_embeddings(&self, embeddings: &[(String, Vec<f32>)]) -> GraphResult<()> {
        log_db!("SET", "__Entity__.embedding", embeddings.len());
        let rows: Vec<_> = embeddings
            .iter()
            .map(|(name, embedding)| json!({ "name": name, "embedding": embedding }))
            .collect();
        let q = bind_params(
            query(
                "UNWIND $rows AS row MATCH (e:__Entity__ {name: row.name}) \
                 CALL db.create.setNodeVectorProperty(e, 'embedding', row.embedding)",
            ),
            &json!({ "rows": rows }),
        );
        self.run(q).await
    }

    async fn store_chunks(&self, document_id: &str, chunks: &[Chunk]) -> GraphResult<()> {
        log_db!("MERGE", "Chunk", chunks.len());
        let q = bind_params(
            query(
                "MERGE (d:Document {id: $document_id}) \
                 WITH d \
                 UNWIND $chunks AS chunk \
                 MERGE (c:Chunk {id: chunk.id}) \
                 SET c.text = chunk.text, c.index = chunk.index, c.embedding = chunk.embedding \
                 MERGE (d)-[:HAS_CHUNK]->(c)",
            ),
            &json!({ "document_id": document_id, "chunks": chunks }),
        );
        self.run(q).await
    }

    async fn store_parent_chunks(&self, document_id: &str, parents: &[ParentChunk]) -> GraphResult<()> {
        log_db!("MERGE", "Parent", parents.len());
        let q = bind_params(
            query(
                "MERGE (d:Document {id: $document_id}) \
                 WITH d \
                 UNWIND $parents AS parent \
                 MERGE (p:Parent {id: parent.id}) \
                 SET p.text = parent.text \
                 MERGE (d)-[:HAS_PARENT]->(p) \
                 WITH p, parent \
                 UNWIND parent.children AS child \
                 MERGE (c:Child {id: child.id}) \
                 SET c.text = child.text, c.index = child.index, c.embedding = child.embedding \
                 MERGE (p)-[:HAS_CHILD]->(c)",
            ),
            &json!({ "document_id": document_id, "parents": parents }),
        );
        self.run(q).await
    }

    async fn parent_search(&self, embedding: &[f32], k: usize) -> GraphResult<Vec<RetrievalResult>> {
        let q = bind_params(
            query(
                "CALL db.index.vector.queryNodes($index, $candidates, $embedding) YIELD node, score \
                 MATCH (node)<-[:HAS_CHILD]-(parent:Parent) \
                 WITH parent, max(score) AS score \
                 RETURN parent.text AS text, score, parent.id AS id, 0 AS index \
                 ORDER BY score DESC LIMIT $k",
            ),
            &json!({
                "index": CHILD_VECTOR_INDEX,
                "candidates": k * 4,
                "embedding": embedding,
                "k": k,
            }),
        );
        Self::hits(self.fetch(q).await?)
    }

    async fn statistics(&self) -> GraphResult<GraphStatistics> {
        let rows = self
            .fetch(query(
                "CALL { MATCH (d:Document) RETURN count(d) AS documents } \
                 CALL { MATCH (c:Chunk) RETURN count(c) AS chunks } \
                 CALL { MATCH (e:__Entity__) RETURN count(e) AS entities } \
                 CALL { MATCH (:__Entity__)-[r:RELATIONSHIP]->(:__Entity__) RETURN count(r) AS relationships } \
                 CALL { MATCH (c:__Community__) RETURN count(c) AS communities } \
                 RETURN documents, chunks, entities, relationships, communities",
            ))
            .await?;
        Ok(GraphStatistics {
            documents: count(&rows, "documents")?,
            chunks: count(&rows, "chunks")?,
            entities: count(&rows, "entities")?,
            relationships: count(&rows, "relationships")?,
            communities: count(&rows, "communities")?,
        })
    }

    async fn reset(&self) -> GraphResult<()> {
        log_db!("DELETE", "*");
        tracing::warn!(uri = %self.uri, "⚠️ Deleting every node and relationship");
        self.run_in_transaction(vec![query("MATCH (n) DETACH DELETE n")]).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relabelling_deletes_stored_communities() {
        let deletes = RESET_COMMUNITY_QUERIES
            .iter()
            .find(|q| q.contains("__Community__"))
            .unwrap();
        assert!(deletes.contains("DETACH DELETE c"));
        assert!(RESET_COMMUNITY_QUERIES[0].contains("REMOVE e.louvain"));
    }
}
