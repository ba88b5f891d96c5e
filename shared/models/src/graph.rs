use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Entities are referenced by their unique name.
pub type EntityRef = String;

/// Strength assigned to a relationship whose extracted strength can't be parsed.
pub const DEFAULT_RELATIONSHIP_STRENGTH: f32 = 5.0;

/// Entity types requested from the extractor when the caller gives none.
pub const DEFAULT_ENTITY_TYPES: [&str; 6] = [
    "PERSON",
    "ORGANIZATION",
    "LOCATION",
    "EVENT",
    "PRODUCT",
    "CONCEPT",
];

/// A named node of the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: EntityRef,
    #[serde(rename = "type")]
    pub entity_type: String,
    /// One description per extraction event, oldest first.
    #[serde(default)]
    pub descriptions: Vec<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            descriptions: Vec::new(),
            summary: None,
            embedding: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.descriptions.push(description.into());
        self
    }

    /// Summary when present, else the first description, else empty.
    pub fn display_description(&self) -> &str {
        self.summary
            .as_deref()
            .or_else(|| self.descriptions.first().map(String::as_str))
            .unwrap_or("")
    }

    pub fn needs_summary(&self) -> bool {
        self.descriptions.len() > 1
    }
}

/// Directed edge between two entities. Parallel edges are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub source: EntityRef,
    pub target: EntityRef,
    pub description: String,
    pub strength: f32,
}

impl Relationship {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        description: impl Into<String>,
        strength: f32,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            description: description.into(),
            strength: clamp_strength(strength),
        }
    }

    /// Parse a strength token as produced by the extractor, e.g. `"7"` or `"8.5)"`.
    pub fn parse_strength(raw: &str) -> f32 {
        raw.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == ')' || c == '(')
            .parse::<f32>()
            .map(clamp_strength)
            .unwrap_or(DEFAULT_RELATIONSHIP_STRENGTH)
    }

    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.source == a && self.target == b) || (self.source == b && self.target == a)
    }
}

fn clamp_strength(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(1.0, 10.0)
    } else {
        DEFAULT_RELATIONSHIP_STRENGTH
    }
}

/// A cluster of entities with its generated report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub community_id: i64,
    pub title: String,
    pub summary: String,
    pub rating: f32,
    pub rating_explanation: String,
    #[serde(default)]
    pub findings: Vec<String>,
    #[serde(default)]
    pub members: BTreeSet<EntityRef>,
}

impl Community {
    pub fn references(&self, name: &str) -> bool {
        self.members.contains(name)
    }
}
