//! Community report prompt and parsing.

use std::collections::BTreeSet;

use kgrag_models::{Community, Entity, Relationship};
use serde::Deserialize;
use serde_json::Value;

use crate::errors::{GraphError, GraphResult};
use crate::llm::json::parse_salvaged;

const REPORT_PROMPT: &str = r#"You are an AI assistant that helps analyze communities within a knowledge graph.
Write a comprehensive report of a community, given a list of entities and their relationships.

The report should include the following sections:
- TITLE: community's name that represents its key entities - title should be short but specific
- SUMMARY: An executive summary of the community's overall structure and key information
- IMPACT SEVERITY RATING: a float score between 0-10 that represents the importance of this community
- RATING EXPLANATION: Give a single sentence explanation of the impact severity rating
- DETAILED FINDINGS: A list of 3-5 key insights about the community

Return output as a well-formed JSON with the following format:
{
    "title": "<report_title>",
    "summary": "<executive_summary>",
    "rating": <impact_severity_rating>,
    "rating_explanation": "<rating_explanation>",
    "findings": [
        {
            "summary": "<insight_1_summary>",
            "explanation": "<insight_1_explanation>"
        },
        {
            "summary": "<insight_2_summary>",
            "explanation": "<insight_2_explanation>"
        }
    ]
}

Community Data:
"#;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Finding {
    Text(String),
    Detailed {
        summary: String,
        #[serde(default)]
        explanation: String,
    },
}

impl Finding {
    fn render(self) -> String {
        match self {
            Finding::Text(text) => text,
            Finding::Detailed { summary, explanation } if explanation.is_empty() => summary,
            Finding::Detailed { summary, explanation } => format!("{}: {}", summary, explanation),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(default)]
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    rating: Value,
    #[serde(default)]
    rating_explanation: String,
    #[serde(default)]
    findings: Vec<Finding>,
}

/// "Entities:" and "Relationships:" listing fed to the report prompt.
pub fn community_input(members: &[&Entity], relationships: &[&Relationship]) -> String {
    let entities: Vec<String> = members
        .iter()
        .map(|e| format!("- {} ({}): {}", e.name, e.entity_type, e.display_description()))
        .collect();
    let rels: Vec<String> = relationships
        .iter()
        .map(|r| format!("- {} -> {}: {}", r.source, r.target, r.description))
        .collect();
    format!("Entities:\n{}\n\nRelationships:\n{}", entities.join("\n"), rels.join("\n"))
}

pub fn report_prompt(input: &str) -> String {
    format!("{}{}", REPORT_PROMPT, input)
}

fn parse_rating(value: &Value) -> f32 {
    let rating = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0) as f32,
        Value::String(s) => s.trim().parse::<f32>().unwrap_or(0.0),
        _ => 0.0,
    };
    if rating.is_finite() {
        rating.clamp(0.0, 10.0)
    } else {
        0.0
    }
}

/// Parse a generated report into a community. The rating is clamped into [0, 10].
pub fn parse_report(raw: &str, community_id: i64, members: BTreeSet<String>) -> GraphResult<Community> {
    let report: RawReport = parse_salvaged(raw)?;
    if report.title.trim().is_empty() && report.summary.trim().is_empty() {
        return Err(GraphError::MalformedOutput(
            "community report has neither title nor summary".to_string(),
        ));
    }

    Ok(Community {
        community_id,
        title: report.title.trim().to_string(),
        summary: report.summary.trim().to_string(),
        rating: parse_rating(&report.rating),
        rating_explanation: report.rating_explanation.trim().to_string(),
        findings: report.findings.into_iter().map(Finding::render).collect(),
        members,
    })
}
