use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kgrag_config::{load_dotenv, AppConfig};
use kgrag_observability::init_tracing_for;
use serde::Serialize;

use graph_rag::community::CommunityService;
use graph_rag::graph_db::{KnowledgeGraph, Neo4jClient, RetrievalBackend};
use graph_rag::ingest::DocumentIngestor;
use graph_rag::llm::{build_embedder, build_generator, TextGenerator};
use graph_rag::services::{ContractExtractionService, EntityExtractionService, HybridSearch, Text2CypherService};
use graph_rag::LocalSearchParams;

#[derive(Parser)]
#[command(name = "graph_rag", about = "Operate the knowledge-graph RAG store")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and store a text file, optionally extracting entities
    Ingest {
        document_id: String,
        path: PathBuf,
        #[arg(long)]
        extract: bool,
    },
    /// Detect communities and generate their reports
    Communities,
    /// Answer from community summaries
    Global {
        question: String,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Answer from the entities nearest to the question
    Local { question: String },
    /// Fused vector and keyword search
    Hybrid {
        question: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Generate and run a Cypher query for the question
    Cypher { question: String },
    /// Node and relationship counts
    Stats,
    /// Best-connected entities and their relationships
    EntitiesGraph {
        #[arg(long, default_value_t = 100)]
        nodes: usize,
        #[arg(long, default_value_t = 200)]
        edges: usize,
    },
    /// Seed the sample movie graph
    LoadMovies,
    /// Delete every node and relationship, then recreate the indexes
    Reset {
        #[arg(long)]
        yes: bool,
    },
    /// Answer a question over the stored contracts
    ContractQuery { question: String },
    /// Contract, organization and location counts
    ContractStats,
    /// Every contract node and edge
    ContractGraph,
    /// Delete contract, organization and location nodes
    ContractClear,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing_for("graph_rag");
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let client = Arc::new(
        Neo4jClient::connect(&config.neo4j)
            .await
            .context("failed to connect to Neo4j")?,
    );
    let graph: Arc<dyn KnowledgeGraph> = client.clone();
    let backend: Arc<dyn RetrievalBackend> = client;
    let embedder = build_embedder(&config).context("failed to build embedding client")?;
    let generator = || -> anyhow::Result<Arc<dyn TextGenerator>> {
        build_generator(&config).context("failed to build LLM client")
    };

    match cli.command {
        Command::Ingest {
            document_id,
            path,
            extract,
        } => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
            graph.ensure_indexes(embedder.dimension()).await?;
            let ingestor = DocumentIngestor::new(graph.clone(), embedder.clone()).with_config(&config.retrieval);
            let chunks = ingestor.ingest_text(&document_id, &text).await?;
            tracing::info!("✅ Stored {} chunks for {}", chunks.len(), document_id);

            if extract {
                let extractor = EntityExtractionService::new(graph.clone(), generator()?, embedder.clone());
                for chunk in &chunks {
                    extractor.extract_and_store(&chunk.text, Some(&chunk.id)).await?;
                }
                let summaries = extractor.summarize_entities().await?;
                let embedded = extractor.create_entity_embeddings().await?;
                tracing::info!("✅ {} entity summaries, {} entity embeddings", summaries.len(), embedded);
            }
            print_json(&graph.statistics().await?)
        }
        Command::Communities => {
            let service = CommunityService::new(graph, generator()?, embedder);
            let detection = service.calculate_communities().await?;
            print_json(&detection)?;
            let report = service.summarize_communities().await?;
            print_json(&report)
        }
        Command::Global { question, threshold } => {
            let service = CommunityService::new(graph, generator()?, embedder);
            let threshold = threshold.unwrap_or(config.retrieval.community_rating_threshold);
            println!("{}", service.global_retrieve(&question, threshold).await?);
            Ok(())
        }
        Command::Local { question } => {
            let service = CommunityService::new(graph, generator()?, embedder);
            println!("{}", service.local_search(&question, LocalSearchParams::default()).await?);
            Ok(())
        }
        Command::Hybrid { question, k } => {
            let search = HybridSearch::new(backend, embedder);
            print_json(&search.search(&question, k.unwrap_or(config.retrieval.default_k)).await)
        }
        Command::Cypher { question } => {
            let service = Text2CypherService::new(backend, generator()?);
            print_json(&service.generate_and_execute(&question).await)
        }
        Command::Stats => print_json(&graph.statistics().await?),
        Command::EntitiesGraph { nodes, edges } => print_json(&graph.entity_graph().await?.view(nodes, edges)),
        Command::LoadMovies => {
            let service = Text2CypherService::new(backend, generator()?);
            let movies = service.load_movie_dataset().await?;
            println!("Loaded {} movies", movies);
            Ok(())
        }
        Command::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to delete the whole database without --yes");
            }
            graph.reset().await?;
            graph.ensure_indexes(embedder.dimension()).await?;
            print_json(&graph.statistics().await?)
        }
        Command::ContractQuery { question } => {
            let service = ContractExtractionService::new(backend, generator()?);
            print_json(&service.query(&question).await?)
        }
        Command::ContractStats => {
            let service = ContractExtractionService::new(backend, generator()?);
            print_json(&service.statistics().await?)
        }
        Command::ContractGraph => {
            let service = ContractExtractionService::new(backend, generator()?);
            print_json(&service.graph_data().await?)
        }
        Command::ContractClear => {
            let service = ContractExtractionService::new(backend, generator()?);
            service.clear().await?;
            println!("Contract data cleared");
            Ok(())
        }
    }
}
