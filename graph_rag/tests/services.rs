mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{HashEmbedder, ScriptedGenerator};
use graph_rag::graph_db::{InMemoryGraph, KnowledgeGraph, Record, RetrievalBackend};
use graph_rag::services::contract_extraction::{validate, ContractExtractionService, ContractSearchField};
use graph_rag::services::{ContractStatistics, EntityExtractionService, Text2CypherService};
use graph_rag::{GraphError, GraphResult};
use kgrag_models::{Chunk, RetrievalResult};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Answers Cypher from canned rows and records every query it receives.
#[derive(Default)]
struct CypherStub {
    queries: Mutex<Vec<(String, Value)>>,
    reject_capitalised_count: bool,
}

#[async_trait]
impl RetrievalBackend for CypherStub {
    async fn vector_search(&self, _: &[f32], _: &str, _: usize) -> GraphResult<Vec<RetrievalResult>> {
        Ok(Vec::new())
    }

    async fn keyword_search(&self, _: &str, _: &str, _: usize) -> GraphResult<Vec<RetrievalResult>> {
        Ok(Vec::new())
    }

    async fn graph_query(&self, cypher: &str, params: Value) -> GraphResult<Vec<Record>> {
        self.queries.lock().push((cypher.to_string(), params.clone()));
        if cypher.contains("UNWIND labels(n)") {
            return Ok(vec![
                json!({"label": "Movie", "properties": ["title", "released"]}),
                json!({"label": "Person", "properties": ["name"]}),
            ]);
        }
        if cypher.contains("DISTINCT type(r) AS relationship_type") {
            return Ok(vec![json!({"relationship_type": "ACTED_IN"})]);
        }
        if cypher.contains("labels(a)[0] AS start") {
            return Ok(vec![json!({"start": "Person", "type": "ACTED_IN", "end": "Movie"})]);
        }
        if cypher.contains("UNWIND $movies") {
            return Ok(vec![json!({"movies": 3})]);
        }
        if cypher.contains("RETURN contracts, organizations") {
            return Ok(vec![json!({"contracts": 2, "organizations": 3, "locations": 1,
                "party_relationships": 4, "location_relationships": 1})]);
        }
        if cypher.contains("AS contract_type, count(c)") {
            return Ok(vec![
                json!({"contract_type": "Lease Agreement", "count": 1}),
                json!({"contract_type": "Service Agreement", "count": 1}),
            ]);
        }
        if cypher.starts_with("MATCH (o:Organization) RETURN o.name") {
            return Ok(vec![json!({"name": "Acme"}), json!({"name": "Globex"})]);
        }
        if self.reject_capitalised_count && cypher.contains("Count(") {
            return Err(GraphError::Neo4j("Unknown function 'Count'".to_string()));
        }
        if cypher.contains("RETURN DISTINCT c AS contract") || cypher.contains("RETURN c AS contract") {
            return Ok(vec![json!({"contract": {"id": "c-1", "contract_type": "Lease Agreement"}})]);
        }
        Ok(vec![json!({"count": 2})])
    }
}

#[tokio::test]
async fn test_repeated_extraction_appends_and_summarizes() {
    let graph = Arc::new(InMemoryGraph::new());
    graph
        .store_chunks("doc", &[Chunk::new("doc", 0, "Ada wrote notes.", vec![])])
        .await
        .unwrap();
    let generator = Arc::new(ScriptedGenerator::new(&[
        r#"("entity"|ADA|PERSON|Mathematician)<|COMPLETE|>"#,
        r#"("entity"|ADA|PERSON|Wrote the first program)|("entity"|ENGINE|PRODUCT|A machine)|("relationship"|ADA|ENGINE|Programmed it|9)"#,
        "Ada is a mathematician who wrote the first program.",
    ]));
    let embedder = Arc::new(HashEmbedder::default());
    let service = EntityExtractionService::new(graph.clone(), generator.clone(), embedder.clone());

    service.extract_and_store("Ada was a mathematician.", Some("doc-0")).await.unwrap();
    service.extract_and_store("Ada programmed the engine.", None).await.unwrap();
    assert_eq!(graph.entity("ADA").unwrap().descriptions.len(), 2);

    // only ADA has more than one description
    let summaries = service.summarize_entities().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].entity, "ADA");
    assert_eq!(generator.call_count(), 3);

    assert_eq!(service.create_entity_embeddings().await.unwrap(), 1);
    assert!(graph.entity("ADA").unwrap().embedding.is_some());
    assert!(graph.entity("ENGINE").unwrap().embedding.is_none());

    let stats = service.entity_statistics().await.unwrap();
    assert_eq!(stats.total_relationships, 1);
    assert_eq!(stats.entity_types["PERSON"], 1);
    assert_eq!(stats.top_connected_entities[0].connections, 1);
}

#[tokio::test]
async fn test_extraction_failure_stores_nothing() {
    let graph = Arc::new(InMemoryGraph::new());
    let generator = Arc::new(ScriptedGenerator::from_results(vec![Err(GraphError::Llm("down".into()))]));
    let service = EntityExtractionService::new(graph.clone(), generator, Arc::new(HashEmbedder::default()));

    let extraction = service.extract_and_store("text", None).await.unwrap();
    assert!(extraction.is_empty());
    assert_eq!(graph.statistics().await.unwrap().entities, 0);
}

#[tokio::test]
async fn test_text2cypher_uses_schema_and_cleans_output() {
    let backend = Arc::new(CypherStub::default());
    let generator = Arc::new(ScriptedGenerator::new(&[
        "```cypher\nMATCH (m:Movie) RETURN count(m) AS count\n```",
    ]));
    let service = Text2CypherService::new(backend.clone(), generator.clone());

    let outcome = service.generate_and_execute("How many movies are there?").await;
    assert!(outcome.is_valid);
    assert!(!outcome.fixed);
    assert_eq!(outcome.cypher_query, "MATCH (m:Movie) RETURN count(m) AS count");
    assert_eq!(outcome.execution_results, vec![json!({"count": 2})]);

    let prompt = generator.prompt(0);
    assert!(prompt.contains("Movie {title: STRING, released: STRING}"));
    assert!(prompt.contains("(:Person)-[:ACTED_IN]->(:Movie)"));
    assert!(prompt.contains("User question: How many movies are there?"));
}

#[tokio::test]
async fn test_text2cypher_fixes_capitalised_aggregates() {
    let backend = Arc::new(CypherStub {
        reject_capitalised_count: true,
        ..Default::default()
    });
    let generator = Arc::new(ScriptedGenerator::new(&["MATCH (m:Movie) RETURN Count(m) AS count"]));
    let service = Text2CypherService::new(backend.clone(), generator);

    let outcome = service.generate_and_execute("How many movies?").await;
    assert!(outcome.is_valid);
    assert!(outcome.fixed);
    assert_eq!(outcome.cypher_query, "MATCH (m:Movie) RETURN count(m) AS count");
    assert!(outcome.error.is_none());
}

#[tokio::test]
async fn test_text2cypher_falls_back_without_schema() {
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let service = Text2CypherService::new(Arc::new(InMemoryGraph::new()), generator.clone());

    let cypher = service.generate_cypher("Who directed The Matrix?", None, &[]).await;
    assert!(cypher.contains("DIRECTED"));
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_contract_extract_validate_store() {
    let backend = Arc::new(CypherStub::default());
    let generator = Arc::new(ScriptedGenerator::new(&[r#"Sure! {"contract_type": "Service Agreement",
        "parties": [{"name": "Acme", "role": "provider", "location": {"city": "Austin", "country": "US"}},
                    {"name": "Globex", "role": "client"}],
        "effective_date": "2024-01-15", "term": "1 year", "contract_scope": "Support",
        "total_amount": 12000.5, "governing_law": {"state": "Texas", "country": "US"}}"#]));
    let service = ContractExtractionService::new(backend.clone(), generator);

    let extracted = service.extract("THIS SERVICE AGREEMENT ...").await.unwrap();
    assert_eq!(extracted.contract.parties.len(), 2);
    assert_eq!(extracted.text_length, 26);
    assert!(validate(&extracted.contract).is_valid);

    let id = service.store(&extracted).await.unwrap();
    assert_eq!(id.len(), 36);
    {
        let queries = backend.queries.lock();
        let (cypher, params) = queries.last().unwrap();
        assert!(cypher.contains("MERGE (org)-[r:PARTY_TO]->(contract)"));
        assert_eq!(params["contract_id"], json!(id));
        assert_eq!(params["governing_law"], json!("Texas US"));
        assert_eq!(params["contract"]["parties"][0]["location"]["city"], json!("Austin"));
    }

    let found = service.search("lease", ContractSearchField::Type).await.unwrap();
    assert_eq!(found, vec![json!({"id": "c-1", "contract_type": "Lease Agreement"})]);
    assert_eq!(backend.queries.lock().last().unwrap().1["term"], json!("lease"));
}

#[tokio::test]
async fn test_contract_extraction_rejects_garbage() {
    let service = ContractExtractionService::new(
        Arc::new(CypherStub::default()),
        Arc::new(ScriptedGenerator::new(&["no contract here"])),
    );
    assert!(matches!(
        service.extract("some text").await,
        Err(GraphError::MalformedOutput(_))
    ));
    assert!(matches!(service.extract("  ").await, Err(GraphError::InvalidInput(_))));
}

#[tokio::test]
async fn test_contract_question_runs_generated_cypher() {
    let backend = Arc::new(CypherStub::default());
    let generator = Arc::new(ScriptedGenerator::new(&[
        "```cypher\nMATCH (o:Organization)-[:PARTY_TO]->(c:Contract)\nWHERE o.name = 'Acme'\n  AND c.total_amount > 1000\nRETURN c AS contract\n```",
        "  Acme is party to one lease.  ",
    ]));
    let service = ContractExtractionService::new(backend.clone(), generator.clone());

    let answer = service.query("Which contracts does Acme have?").await.unwrap();
    assert_eq!(
        answer.cypher_query,
        "MATCH (o:Organization)-[:PARTY_TO]->(c:Contract)\nWHERE o.name = 'Acme'\nAND c.total_amount > 1000\nRETURN c AS contract"
    );
    assert_eq!(answer.results.len(), 1);
    assert_eq!(answer.answer, "Acme is party to one lease.");
    assert_eq!(backend.queries.lock()[0].0, answer.cypher_query);
    assert!(generator.prompt(0).contains("[:PARTY_TO {role}]"));
    assert!(generator.prompt(1).contains("Lease Agreement"));

    assert!(matches!(service.query(" ").await, Err(GraphError::InvalidInput(_))));
}

#[tokio::test]
async fn test_contract_statistics_and_graph_data() {
    let backend = Arc::new(CypherStub::default());
    let service = ContractExtractionService::new(backend.clone(), Arc::new(ScriptedGenerator::new(&[])));

    let stats = service.statistics().await.unwrap();
    assert_eq!(
        stats,
        ContractStatistics {
            contracts: 2,
            organizations: 3,
            locations: 1,
            party_relationships: 4,
            location_relationships: 1,
            by_type: [("Lease Agreement".to_string(), 1), ("Service Agreement".to_string(), 1)].into(),
        }
    );

    let data = service.graph_data().await.unwrap();
    assert_eq!(data.organizations, vec![json!({"name": "Acme"}), json!({"name": "Globex"})]);
    let queries: Vec<String> = backend.queries.lock().iter().map(|(q, _)| q.clone()).collect();
    assert_eq!(queries.len(), 7);
    assert!(queries[2].starts_with("MATCH (c:Contract)"));
    assert!(queries[5].contains("[r:PARTY_TO]"));
    assert!(queries[6].contains("[:LOCATED_AT]"));
}

#[tokio::test]
async fn test_contract_clear_targets_contract_labels() {
    let backend = Arc::new(CypherStub::default());
    let service = ContractExtractionService::new(backend.clone(), Arc::new(ScriptedGenerator::new(&[])));
    service.clear().await.unwrap();

    let queries = backend.queries.lock();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].0.contains("n:Contract OR n:Organization OR n:Location DETACH DELETE n"));
}

#[tokio::test]
async fn test_contract_graph_needs_cypher() {
    let service = ContractExtractionService::new(Arc::new(InMemoryGraph::new()), Arc::new(ScriptedGenerator::new(&[])));
    assert!(matches!(service.statistics().await, Err(GraphError::Unsupported(_))));
    assert!(matches!(service.clear().await, Err(GraphError::Unsupported(_))));
}

#[tokio::test]
async fn test_movie_dataset_is_seeded_in_one_statement() {
    let backend = Arc::new(CypherStub::default());
    let service = Text2CypherService::new(backend.clone(), Arc::new(ScriptedGenerator::new(&[])));

    assert_eq!(service.load_movie_dataset().await.unwrap(), 3);
    let queries = backend.queries.lock();
    assert_eq!(queries.len(), 1);
    let (cypher, params) = &queries[0];
    assert!(cypher.contains("MERGE (m:Movie {title: movie.title})"));
    let movies = params["movies"].as_array().unwrap();
    assert_eq!(movies.len(), 3);
    assert_eq!(movies[0]["title"], "The Matrix");
    assert_eq!(movies[0]["cast"][0], json!({"name": "Keanu Reeves", "born": 1964, "roles": ["Neo"]}));
    assert_eq!(movies[2]["directors"][0]["name"], "Ron Howard");
}
