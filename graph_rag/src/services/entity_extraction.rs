//! LLM-driven entity and relationship extraction into the knowledge graph.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use kgrag_models::{ConversationTurn, Entity, Relationship, DEFAULT_ENTITY_TYPES};
use kgrag_observability::log_entities_extracted;
use serde::{Deserialize, Serialize};

use crate::errors::GraphResult;
use crate::graph_db::KnowledgeGraph;
use crate::llm::{Embedder, GenerationOptions, TextGenerator};

const SERVICE: &str = "entity-extraction";
const COMPLETE_MARKER: &str = "<|COMPLETE|>";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub entity: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectedEntity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub connections: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStatistics {
    pub entity_types: BTreeMap<String, usize>,
    pub total_relationships: usize,
    pub top_connected_entities: Vec<ConnectedEntity>,
}

pub struct EntityExtractionService {
    graph: Arc<dyn KnowledgeGraph>,
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
}

impl EntityExtractionService {
    pub fn new(
        graph: Arc<dyn KnowledgeGraph>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            graph,
            generator,
            embedder,
        }
    }

    /// Extract entities of `entity_types` (the defaults when empty) and their
    /// relationships. Generation failures yield an empty extraction.
    pub async fn extract(&self, text: &str, entity_types: &[&str]) -> Extraction {
        let types: Vec<&str> = if entity_types.is_empty() {
            DEFAULT_ENTITY_TYPES.to_vec()
        } else {
            entity_types.to_vec()
        };
        let prompt = extraction_prompt(&types, text);
        match self
            .generator
            .generate(&[ConversationTurn::user(prompt)], GenerationOptions::default())
            .await
        {
            Ok(output) => parse_extraction(&output),
            Err(e) => {
                tracing::warn!("⚠️ Entity extraction failed: {}", e);
                Extraction::default()
            }
        }
    }

    /// Merge entities (appending descriptions) and create relationships.
    pub async fn store(&self, extraction: &Extraction, chunk_id: Option<&str>) -> GraphResult<()> {
        self.graph.upsert_entities(&extraction.entities, chunk_id).await?;
        self.graph.create_relationships(&extraction.relationships).await?;
        log_entities_extracted(
            SERVICE,
            chunk_id,
            extraction.entities.len(),
            extraction.relationships.len(),
        );
        Ok(())
    }

    pub async fn extract_and_store(&self, text: &str, chunk_id: Option<&str>) -> GraphResult<Extraction> {
        let extraction = self.extract(text, &[]).await;
        if !extraction.is_empty() {
            self.store(&extraction, chunk_id).await?;
        }
        Ok(extraction)
    }

    /// Merge the descriptions of every entity extracted more than once.
    pub async fn summarize_entities(&self) -> GraphResult<Vec<EntitySummary>> {
        let graph = self.graph.entity_graph().await?;
        let mut summaries = Vec::new();

        for entity in graph.entities.iter().filter(|e| e.needs_summary()) {
            let prompt = format!(
                "You are a helpful assistant responsible for generating a comprehensive summary of the data provided below.\n\
                 Given an entity and a list of descriptions, all related to the same entity.\n\
                 Please concatenate all of these into a single, comprehensive description. Make sure to include information collected from all the descriptions.\n\
                 If the provided descriptions are contradictory, please resolve the contradictions and provide a single, coherent summary.\n\
                 Make sure it is written in third person, and include the entity name so we have the full context.\n\n\
                 Entity: {}\nDescription List: {:?}\n\nSummary:",
                entity.name, entity.descriptions
            );
            match self
                .generator
                .generate(&[ConversationTurn::user(prompt)], GenerationOptions::default())
                .await
            {
                Ok(summary) if !summary.trim().is_empty() => summaries.push(EntitySummary {
                    entity: entity.name.clone(),
                    summary: summary.trim().to_string(),
                }),
                Ok(_) => tracing::warn!("⚠️ Empty summary for entity {}", entity.name),
                Err(e) => tracing::warn!("⚠️ Failed to summarize entity {}: {}", entity.name, e),
            }
        }

        if !summaries.is_empty() {
            let pairs: Vec<(String, String)> = summaries
                .iter()
                .map(|s| (s.entity.clone(), s.summary.clone()))
                .collect();
            self.graph.set_entity_summaries(&pairs).await?;
        }
        tracing::info!("✅ Summarized {} entities", summaries.len());
        Ok(summaries)
    }

    /// Embed the summary of every summarized entity. Returns how many were stored.
    pub async fn create_entity_embeddings(&self) -> GraphResult<usize> {
        let graph = self.graph.entity_graph().await?;
        let mut embeddings = Vec::new();
        for entity in &graph.entities {
            let Some(summary) = entity.summary.as_deref().filter(|s| !s.trim().is_empty()) else {
                continue;
            };
            match self.embedder.embed(summary).await {
                Ok(vector) => embeddings.push((entity.name.clone(), vector)),
                Err(e) => tracing::warn!("⚠️ Failed to embed entity {}: {}", entity.name, e),
            }
        }
        if !embeddings.is_empty() {
            self.graph.set_entity_embeddings(&embeddings).await?;
        }
        Ok(embeddings.len())
    }

    pub async fn entity_statistics(&self) -> GraphResult<EntityStatistics> {
        let graph = self.graph.entity_graph().await?;

        let mut stats = EntityStatistics {
            total_relationships: graph.relationships.len(),
            ..Default::default()
        };
        for entity in &graph.entities {
            *stats.entity_types.entry(entity.entity_type.clone()).or_default() += 1;
        }

        let mut degree: HashMap<&str, usize> = HashMap::new();
        for rel in &graph.relationships {
            *degree.entry(rel.source.as_str()).or_default() += 1;
            *degree.entry(rel.target.as_str()).or_default() += 1;
        }
        let mut connected: Vec<ConnectedEntity> = graph
            .entities
            .iter()
            .map(|e| ConnectedEntity {
                name: e.name.clone(),
                entity_type: e.entity_type.clone(),
                connections: degree.get(e.name.as_str()).copied().unwrap_or(0),
            })
            .collect();
        connected.sort_by(|a, b| b.connections.cmp(&a.connections).then_with(|| a.name.cmp(&b.name)));
        connected.truncate(10);
        stats.top_connected_entities = connected;
        Ok(stats)
    }
}

pub fn extraction_prompt(entity_types: &[&str], text: &str) -> String {
    let types = entity_types.join(", ");
    format!(
        r#"-Goal-
Given a text document that is potentially relevant to this activity and a list of entity types, identify all entities of those types from the text and all relationships among the identified entities.

-Steps-
1. Identify all entities. For each identified entity, extract the following information:
- entity_name: Name of the entity, capitalized
- entity_type: One of the following types: [{types}]
- entity_description: Comprehensive description of the entity's attributes and activities
Format each entity as ("entity"|<entity_name>|<entity_type>|<entity_description>)

2. From the entities identified in step 1, identify all pairs of (source_entity, target_entity) that are *clearly related* to each other.
For each pair of related entities, extract the following information:
- source_entity: name of the source entity, as identified in step 1
- target_entity: name of the target entity, as identified in step 1
- relationship_description: explanation as to why you think the source entity and the target entity are related to each other
- relationship_strength: a numeric score indicating strength of the relationship between the source entity and target entity (1-10)
Format each relationship as ("relationship"|<source_entity>|<target_entity>|<relationship_description>|<relationship_strength>)

3. Return output in English as a single list of all the entities and relationships identified in steps 1 and 2. Use **|** as the list delimiter.

4. When finished, output {marker}

######################
-Real Data-
######################
Entity_types: {types}
Text: {text}
######################
Output:"#,
        types = types,
        marker = COMPLETE_MARKER,
        text = text
    )
}

fn clean(part: &str) -> String {
    part.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == ')' || c == '(')
        .to_string()
}

fn is_record_start(item: &str) -> bool {
    item.starts_with("(\"entity\"") || item.starts_with("(\"relationship\"")
}

/// Parse tuple-delimited extractor output. Malformed records are skipped.
pub fn parse_extraction(output: &str) -> Extraction {
    let cleaned = output.replace(COMPLETE_MARKER, "").replace("**", "");
    let items = cleaned
        .split(|c: char| c == '|' || c == '\n')
        .map(str::trim)
        .filter(|item| !item.is_empty());

    let mut records: Vec<Vec<&str>> = Vec::new();
    for item in items {
        if is_record_start(item) {
            records.push(vec![item]);
        } else if let Some(current) = records.last_mut() {
            current.push(item);
        }
    }

    let mut extraction = Extraction::default();
    for record in records {
        if record[0].contains("\"entity\"") && record.len() >= 4 {
            let name = clean(record[1]);
            if !name.is_empty() {
                extraction
                    .entities
                    .push(Entity::new(name, clean(record[2])).with_description(clean(record[3])));
            }
        } else if record[0].contains("\"relationship\"") && record.len() >= 5 {
            let (source, target) = (clean(record[1]), clean(record[2]));
            if !source.is_empty() && !target.is_empty() {
                extraction.relationships.push(Relationship::new(
                    source,
                    target,
                    clean(record[3]),
                    Relationship::parse_strength(record[4]),
                ));
            }
        }
    }
    extraction
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pipe_delimited_records() {
        let output = r#"("entity"|ADA LOVELACE|PERSON|Mathematician and writer)|("entity"|ANALYTICAL ENGINE|PRODUCT|Proposed mechanical computer)|("relationship"|ADA LOVELACE|ANALYTICAL ENGINE|Wrote the first program for it|9)<|COMPLETE|>"#;
        let extraction = parse_extraction(output);

        assert_eq!(extraction.entities.len(), 2);
        assert_eq!(extraction.entities[0].name, "ADA LOVELACE");
        assert_eq!(extraction.entities[0].entity_type, "PERSON");
        assert_eq!(extraction.entities[0].descriptions, vec!["Mathematician and writer"]);
        assert_eq!(extraction.relationships.len(), 1);
        assert_eq!(extraction.relationships[0].strength, 9.0);
    }

    #[test]
    fn test_newline_separated_records_and_bad_strength() {
        let output = "(\"entity\"|A|PERSON|first)\n(\"entity\"|B|ORGANIZATION|second)\n\
                      (\"relationship\"|A|B|works at|very strong)\n<|COMPLETE|>";
        let extraction = parse_extraction(output);
        assert_eq!(extraction.entities.len(), 2);
        assert_eq!(extraction.relationships[0].strength, 5.0);
        assert_eq!(extraction.relationships[0].description, "works at");
    }

    #[test]
    fn test_incomplete_records_are_skipped() {
        let output = "(\"entity\"|A|PERSON)|(\"relationship\"|A|B|knows)|noise";
        assert!(parse_extraction(output).is_empty());
        assert!(parse_extraction("").is_empty());
    }

    #[test]
    fn test_prompt_lists_types() {
        let prompt = extraction_prompt(&["PERSON", "EVENT"], "some text");
        assert!(prompt.contains("[PERSON, EVENT]"));
        assert!(prompt.contains("Text: some text"));
        assert!(prompt.contains(COMPLETE_MARKER));
    }
}
