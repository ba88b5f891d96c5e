mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use common::{HashEmbedder, ScriptedGenerator};
use graph_rag::community::{CommunityService, LocalSearchParams, NO_COMMUNITY_ANSWER, NO_LOCAL_ANSWER};
use graph_rag::graph_db::{InMemoryGraph, KnowledgeGraph};
use graph_rag::services::EntityExtractionService;
use graph_rag::GraphError;
use kgrag_models::{Chunk, Community, Entity, Relationship};

const REPORT: &str = r#"{"title": "Alice and Acme", "summary": "Alice works at Acme.", "rating": 7.0,
    "rating_explanation": "Small but central.", "findings": [{"summary": "Employment", "explanation": "Alice is employed by Acme."}]}"#;

fn community(id: i64, title: &str, rating: f32, members: &[&str]) -> Community {
    Community {
        community_id: id,
        title: title.to_string(),
        summary: format!("{} summary", title),
        rating,
        rating_explanation: String::new(),
        findings: Vec::new(),
        members: members.iter().map(|m| m.to_string()).collect::<BTreeSet<_>>(),
    }
}

#[tokio::test]
async fn test_extracted_pair_becomes_one_community() {
    let graph = Arc::new(InMemoryGraph::new());
    let embedder = Arc::new(HashEmbedder::default());
    let generator = Arc::new(ScriptedGenerator::new(&[
        r#"("entity"|A|PERSON|An engineer)|("entity"|B|ORGANIZATION|A company)|("relationship"|A|B|A works at B|7)<|COMPLETE|>"#,
        REPORT,
    ]));

    // Step 1: extract A -> B with strength 7
    let extractor = EntityExtractionService::new(graph.clone(), generator.clone(), embedder.clone());
    let extraction = extractor.extract_and_store("A works at B.", None).await.unwrap();
    assert_eq!(extraction.relationships[0].strength, 7.0);

    // Step 2: detect communities
    let service = CommunityService::new(graph.clone(), generator.clone(), embedder);
    let detection = service.calculate_communities().await.unwrap();
    assert_eq!(detection.community_count, 1);
    assert_eq!(detection.distribution["max"], 2.0);
    assert_eq!(detection.distribution["min"], 2.0);

    // Step 3: summarize
    let report = service.summarize_communities().await.unwrap();
    assert_eq!(report.summarized_count, 1);
    assert!(report.errors.is_empty());
    assert!(generator.prompt(1).contains("- A -> B: A works at B"));

    let stored = graph.communities();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].references("A"));
    assert!(stored[0].references("B"));
    assert_eq!(stored[0].title, "Alice and Acme");
    assert_eq!(stored[0].findings, vec!["Employment: Alice is employed by Acme.".to_string()]);
    assert_eq!(generator.call_count(), 2);
}

#[tokio::test]
async fn test_failed_report_does_not_stop_the_batch() {
    let graph = Arc::new(InMemoryGraph::new());
    graph
        .create_relationships(&[
            Relationship::new("A", "B", "knows", 5.0),
            Relationship::new("C", "D", "knows", 5.0),
        ])
        .await
        .unwrap();
    let generator = Arc::new(ScriptedGenerator::new(&["I cannot write JSON today", REPORT]));
    let service = CommunityService::new(graph.clone(), generator.clone(), Arc::new(HashEmbedder::default()));

    assert_eq!(service.calculate_communities().await.unwrap().community_count, 2);
    let report = service.summarize_communities().await.unwrap();

    assert_eq!(report.summarized_count, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].community_id, 0);
    assert_eq!(graph.communities().len(), 1);
    assert!(graph.communities()[0].references("C"));
}

#[tokio::test]
async fn test_recalculation_drops_previous_communities() {
    let graph = Arc::new(InMemoryGraph::new());
    graph
        .create_relationships(&[Relationship::new("A", "B", "knows", 5.0)])
        .await
        .unwrap();
    graph.save_community(&community(9, "Stale", 9.0, &["A"])).await.unwrap();
    let generator = Arc::new(ScriptedGenerator::new(&[REPORT]));
    let service = CommunityService::new(graph.clone(), generator, Arc::new(HashEmbedder::default()));

    service.calculate_communities().await.unwrap();
    assert!(graph.communities().is_empty());

    service.summarize_communities().await.unwrap();
    let stored = graph.communities();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].title, "Alice and Acme");
    assert!(graph.communities_by_rating(8.0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_singletons_are_not_summarized() {
    let graph = Arc::new(InMemoryGraph::new());
    graph
        .upsert_entities(&[Entity::new("Loner", "PERSON"), Entity::new("Hermit", "PERSON")], None)
        .await
        .unwrap();
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let service = CommunityService::new(graph, generator.clone(), Arc::new(HashEmbedder::default()));

    assert_eq!(service.calculate_communities().await.unwrap().community_count, 2);
    let report = service.summarize_communities().await.unwrap();
    assert_eq!(report.summarized_count, 0);
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_high_threshold_skips_generation() {
    let graph = Arc::new(InMemoryGraph::new());
    for (id, rating) in [(0, 3.0), (1, 5.0), (2, 4.5)] {
        graph.save_community(&community(id, "c", rating, &[])).await.unwrap();
    }
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let service = CommunityService::new(graph, generator.clone(), Arc::new(HashEmbedder::default()));

    let answer = service.global_retrieve("What happened?", 9.9).await.unwrap();
    assert_eq!(answer, NO_COMMUNITY_ANSWER);
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_global_retrieval_maps_then_reduces() {
    let graph = Arc::new(InMemoryGraph::new());
    graph.save_community(&community(0, "Low", 6.0, &[])).await.unwrap();
    graph.save_community(&community(1, "High", 8.0, &[])).await.unwrap();
    graph.save_community(&community(2, "Ignored", 2.0, &[])).await.unwrap();
    let generator = Arc::new(ScriptedGenerator::from_results(vec![
        Ok("High says yes".to_string()),
        Err(GraphError::Llm("rate limited".to_string())),
        Ok("Combined answer".to_string()),
    ]));
    let service = CommunityService::new(graph, generator.clone(), Arc::new(HashEmbedder::default()));

    let answer = service.global_retrieve("Is it so?", 5.0).await.unwrap();
    assert_eq!(answer, "Combined answer");
    assert_eq!(generator.call_count(), 3);
    assert!(generator.prompt(0).contains("Title: High"));
    let reduce = generator.prompt(2);
    assert!(reduce.contains("Community: High (Rating: 8)\nHigh says yes"));
    assert!(reduce.contains("Community: Low (Rating: 6)"));
    assert!(!reduce.contains("Ignored"));
}

#[tokio::test]
async fn test_local_search_gathers_entity_context() {
    let graph = Arc::new(InMemoryGraph::new());
    graph
        .store_chunks("doc", &[Chunk::new("doc", 0, "Alice founded Acme in 1999.", vec![])])
        .await
        .unwrap();
    graph
        .upsert_entities(
            &[
                Entity::new("Alice", "PERSON").with_description("Founder of Acme"),
                Entity::new("Acme", "ORGANIZATION").with_description("Rocket company"),
            ],
            Some("doc-0"),
        )
        .await
        .unwrap();
    graph
        .create_relationships(&[Relationship::new("Alice", "Acme", "Alice founded Acme", 9.0)])
        .await
        .unwrap();
    graph
        .set_entity_embeddings(&[
            ("Alice".to_string(), HashEmbedder::vector("Alice founder")),
            ("Acme".to_string(), HashEmbedder::vector("Acme rockets")),
        ])
        .await
        .unwrap();
    graph
        .save_community(&community(0, "Acme founders", 8.0, &["Alice", "Acme"]))
        .await
        .unwrap();

    let generator = Arc::new(ScriptedGenerator::new(&["Alice founded Acme."]));
    let service = CommunityService::new(graph, generator.clone(), Arc::new(HashEmbedder::default()));
    let answer = service
        .local_search("Who is the Acme founder?", LocalSearchParams::default())
        .await
        .unwrap();

    assert_eq!(answer, "Alice founded Acme.");
    let prompt = generator.prompt(0);
    assert!(prompt.contains("- Alice founded Acme in 1999."));
    assert!(prompt.contains("- Acme founders summary"));
    assert!(prompt.contains("- Alice founded Acme\n"));
    assert!(prompt.contains("Alice: Founder of Acme"));
    assert!(prompt.contains("Do not make anything up."));
}

#[tokio::test]
async fn test_local_search_without_entities() {
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let service = CommunityService::new(
        Arc::new(InMemoryGraph::new()),
        generator.clone(),
        Arc::new(HashEmbedder::default()),
    );
    let answer = service
        .local_search("anything", LocalSearchParams::default())
        .await
        .unwrap();
    assert_eq!(answer, NO_LOCAL_ANSWER);
    assert_eq!(generator.call_count(), 0);
}
