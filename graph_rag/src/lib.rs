//! Knowledge-graph retrieval-augmented generation.
//!
//! Storage backends (Neo4j and in-memory), LLM and embedding clients, hybrid
//! retrieval, community detection with global and local retrieval, document
//! ingestion, and the extraction and text-to-Cypher services built on them.

pub mod community;
pub mod errors;
pub mod graph_db;
pub mod ingest;
pub mod llm;
pub mod services;

pub use community::{CommunityDetection, CommunityService, CommunitySummaryReport, LocalSearchParams};
pub use errors::{GraphError, GraphResult};
pub use graph_db::{InMemoryGraph, KnowledgeGraph, Neo4jClient, RetrievalBackend};
pub use llm::{Embedder, GenerationOptions, TextGenerator};
