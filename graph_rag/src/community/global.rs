//! Map/reduce question answering over community summaries.

use kgrag_models::{Community, ConversationTurn};

use super::CommunityService;
use crate::errors::GraphResult;
use crate::llm::GenerationOptions;

pub const NO_COMMUNITY_ANSWER: &str = "No relevant community information found for this query.";
pub const DEFAULT_RATING_THRESHOLD: f32 = 5.0;

struct Intermediate {
    title: String,
    rating: f32,
    response: String,
}

fn map_prompt(community: &Community, query: &str) -> String {
    format!(
        "You are a helpful assistant responding to questions about data in the provided community summary.\n\n\
         Generate a response consisting of key points that respond to the user's question, \
         summarizing all relevant information from the community data.\n\n\
         If you don't know the answer or if the community data doesn't contain sufficient information \
         to provide an answer, just say so. Do not make anything up.\n\n\
         Community Summary:\nTitle: {}\nSummary: {}\nRating: {}\n\n\
         User Question: {}\n\nResponse:",
        community.title, community.summary, community.rating, query
    )
}

fn reduce_prompt(intermediate: &[Intermediate], query: &str) -> String {
    let analyses: Vec<String> = intermediate
        .iter()
        .map(|r| format!("Community: {} (Rating: {})\n{}\n", r.title, r.rating, r.response))
        .collect();
    format!(
        "You are a helpful assistant responding to questions by synthesizing information from multiple community analyses.\n\n\
         Generate a comprehensive response that responds to the user's question by combining and \
         summarizing all the relevant information from the community analyses below.\n\n\
         Remove any irrelevant information and merge the relevant information into a comprehensive answer.\n\
         If you don't know the answer or if the provided information doesn't contain sufficient information \
         to provide an answer, just say so. Do not make anything up.\n\n\
         Community Analyses:\n{}\n\
         User Question: {}\n\nComprehensive Response:",
        analyses.join("\n"),
        query
    )
}

impl CommunityService {
    /// Answer from every community rated at least `rating_threshold`: one
    /// generation per community, then one to combine them.
    pub async fn global_retrieve(&self, query: &str, rating_threshold: f32) -> GraphResult<String> {
        let communities = self.graph.communities_by_rating(rating_threshold).await?;
        if communities.is_empty() {
            tracing::info!("🔍 No communities rated >= {}", rating_threshold);
            return Ok(NO_COMMUNITY_ANSWER.to_string());
        }
        tracing::info!("🔍 Global retrieval over {} communities", communities.len());

        let mut intermediate = Vec::with_capacity(communities.len());
        for community in &communities {
            let response = match self
                .generator
                .generate(&[ConversationTurn::user(map_prompt(community, query))], GenerationOptions::default())
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!("⚠️ Map step failed for community {}: {}", community.community_id, e);
                    "No analysis available for this community.".to_string()
                }
            };
            intermediate.push(Intermediate {
                title: community.title.clone(),
                rating: community.rating,
                response,
            });
        }

        self.generator
            .generate(
                &[ConversationTurn::user(reduce_prompt(&intermediate, query))],
                GenerationOptions::default(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_prompt_tags_title_and_rating() {
        let intermediate = vec![Intermediate {
            title: "Acme".into(),
            rating: 8.0,
            response: "Acme builds rockets.".into(),
        }];
        let prompt = reduce_prompt(&intermediate, "What does Acme do?");
        assert!(prompt.contains("Community: Acme (Rating: 8)\nAcme builds rockets."));
        assert!(prompt.contains("Do not make anything up."));
    }
}
