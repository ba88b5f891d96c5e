//! Community detection, summarization and community-based retrieval.

pub mod global;
pub mod local;
pub mod louvain;
pub mod report;

pub use global::{DEFAULT_RATING_THRESHOLD, NO_COMMUNITY_ANSWER};
pub use local::{LocalContext, LocalSearchParams, NO_LOCAL_ANSWER};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use kgrag_models::{Community, ConversationTurn, Entity, Relationship};
use kgrag_observability::{log_communities_detected, log_community_summarized};
use serde::{Deserialize, Serialize};

use crate::errors::GraphResult;
use crate::graph_db::KnowledgeGraph;
use crate::llm::{Embedder, GenerationOptions, TextGenerator};

const SERVICE: &str = "community";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityDetection {
    pub community_count: usize,
    /// Community size statistics keyed `min`, `max`, `mean`, `p50`, `p75`, `p90`, `p99`.
    pub distribution: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityError {
    pub community_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunitySummaryReport {
    pub summarized_count: usize,
    pub communities: Vec<Community>,
    pub errors: Vec<CommunityError>,
}

pub struct CommunityService {
    graph: Arc<dyn KnowledgeGraph>,
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
}

impl CommunityService {
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

    /// Cluster the entity graph and replace every entity's community label.
    pub async fn calculate_communities(&self) -> GraphResult<CommunityDetection> {
        let start = Instant::now();
        let graph = self.graph.entity_graph().await?;
        tracing::info!(
            "🔷 Detecting communities over {} entities and {} relationships",
            graph.entities.len(),
            graph.relationships.len()
        );

        let labels = louvain::detect(&graph.entities, &graph.relationships);
        self.graph.write_community_labels(&labels).await?;

        let detection = CommunityDetection {
            community_count: labels.values().collect::<BTreeSet<_>>().len(),
            distribution: louvain::size_distribution(&labels),
        };
        log_communities_detected(
            SERVICE,
            detection.community_count,
            labels.len(),
            start.elapsed().as_millis() as u64,
        );
        Ok(detection)
    }

    /// Generate and store a report for every labelled community with more
    /// than one member. Each report is stored as soon as it parses; failures
    /// are collected and the batch continues.
    pub async fn summarize_communities(&self) -> GraphResult<CommunitySummaryReport> {
        let graph = self.graph.entity_graph().await?;
        let by_name: BTreeMap<&str, &Entity> = graph.entities.iter().map(|e| (e.name.as_str(), e)).collect();

        let mut groups: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
        for (name, label) in &graph.labels {
            groups.entry(*label).or_default().insert(name.clone());
        }

        let mut report = CommunitySummaryReport::default();
        for (community_id, members) in groups.into_iter().filter(|(_, m)| m.len() > 1) {
            let entities: Vec<&Entity> = members.iter().filter_map(|n| by_name.get(n.as_str()).copied()).collect();
            let relationships: Vec<&Relationship> = graph
                .relationships
                .iter()
                .filter(|r| members.contains(&r.source) && members.contains(&r.target))
                .collect();
            let member_count = members.len();

            match self.summarize_one(community_id, members, &entities, &relationships).await {
                Ok(community) => {
                    log_community_summarized(SERVICE, community_id, member_count, None);
                    report.communities.push(community);
                }
                Err(e) => {
                    let message = e.to_string();
                    log_community_summarized(SERVICE, community_id, member_count, Some(&message));
                    report.errors.push(CommunityError { community_id, message });
                }
            }
        }

        report.summarized_count = report.communities.len();
        tracing::info!(
            "✅ Summarized {} communities ({} failed)",
            report.summarized_count,
            report.errors.len()
        );
        Ok(report)
    }

    async fn summarize_one(
        &self,
        community_id: i64,
        members: BTreeSet<String>,
        entities: &[&Entity],
        relationships: &[&Relationship],
    ) -> GraphResult<Community> {
        let prompt = report::report_prompt(&report::community_input(entities, relationships));
        let raw = self
            .generator
            .generate(&[ConversationTurn::user(prompt)], GenerationOptions::json())
            .await?;
        let community = report::parse_report(&raw, community_id, members)?;
        self.graph.save_community(&community).await?;
        Ok(community)
    }
}
