//! Natural-language questions to Cypher, with schema-aware prompting.

use std::collections::BTreeMap;
use std::sync::Arc;

use kgrag_models::ConversationTurn;
use serde::{Deserialize, Serialize};

use crate::errors::GraphResult;
use crate::graph_db::{Record, RetrievalBackend};
use crate::llm::{GenerationOptions, TextGenerator};

const NODE_PROPERTIES_QUERY: &str = "MATCH (n) \
     UNWIND labels(n) AS label \
     WITH label, collect(DISTINCT keys(n)) AS all_keys \
     UNWIND all_keys AS key_list \
     UNWIND key_list AS property \
     WITH label, collect(DISTINCT property) AS properties \
     RETURN label, properties ORDER BY label";

const REL_TYPES_QUERY: &str = "MATCH ()-[r]->() \
     WITH DISTINCT type(r) AS relationship_type \
     RETURN relationship_type ORDER BY relationship_type";

const REL_PATTERNS_QUERY: &str = "MATCH (a)-[r]->(b) \
     RETURN DISTINCT labels(a)[0] AS start, type(r) AS type, labels(b)[0] AS end \
     LIMIT 100";

/// Idempotent: movies and people are merged by title and name.
const MOVIE_DATASET_QUERY: &str = "UNWIND $movies AS movie \
     MERGE (m:Movie {title: movie.title}) \
     SET m.released = movie.released, m.tagline = movie.tagline \
     FOREACH (actor IN movie.cast | \
         MERGE (p:Person {name: actor.name}) SET p.born = actor.born \
         MERGE (p)-[r:ACTED_IN]->(m) SET r.roles = actor.roles) \
     FOREACH (director IN movie.directors | \
         MERGE (p:Person {name: director.name}) SET p.born = director.born \
         MERGE (p)-[:DIRECTED]->(m)) \
     RETURN count(m) AS movies";

pub const DEFAULT_TERMINOLOGY: &str = "Persons: When a user asks about a person by trade like actor, writer, director, producer, or reviewer, they are referring to a node with the label Person.\n\
Movies: When a user asks about a film or movie, they are referring to a node with the label Movie.";

const CLAUSE_KEYWORDS: [&str; 8] = ["MATCH", "OPTIONAL", "WITH", "UNWIND", "CALL", "RETURN", "MERGE", "CREATE"];
const EXPLANATION_MARKERS: [&str; 5] = ["explanation", "this query", "the query", "cypher:", "query:"];
const AGGREGATE_FIXES: [(&str, &str); 5] = [
    ("Count(", "count("),
    ("Sum(", "sum("),
    ("Max(", "max("),
    ("Min(", "min("),
    ("Avg(", "avg("),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CypherExample {
    pub question: String,
    pub cypher: String,
}

impl CypherExample {
    pub fn new(question: impl Into<String>, cypher: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            cypher: cypher.into(),
        }
    }
}

pub fn default_examples() -> Vec<CypherExample> {
    vec![
        CypherExample::new(
            "Who are the two people who have acted in the most movies together?",
            "MATCH (p1:Person)-[:ACTED_IN]->(m:Movie)<-[:ACTED_IN]-(p2:Person) WHERE p1 <> p2 \
             RETURN p1.name, p2.name, COUNT(m) AS movieCount ORDER BY movieCount DESC LIMIT 1",
        ),
        CypherExample::new(
            "In what country was the movie Ready Player One produced?",
            "MATCH (m:Movie { title: 'Ready Player One' })-[:PRODUCED_IN]->(c:Country) RETURN c.name",
        ),
    ]
}

/// Labels, relationship types and observed patterns of the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSchema {
    pub node_properties: BTreeMap<String, Vec<String>>,
    pub relationship_types: Vec<String>,
    pub patterns: Vec<(String, String, String)>,
}

impl GraphSchema {
    pub fn to_prompt_string(&self) -> String {
        let nodes: Vec<String> = self
            .node_properties
            .iter()
            .map(|(label, props)| {
                let props: Vec<String> = props.iter().map(|p| format!("{}: STRING", p)).collect();
                format!("{} {{{}}}", label, props.join(", "))
            })
            .collect();
        let rels: Vec<String> = self.relationship_types.iter().map(|t| format!("{} {{}}", t)).collect();
        let patterns: Vec<String> = self
            .patterns
            .iter()
            .map(|(start, rel, end)| format!("(:{})-[:{}]->(:{})", start, rel, end))
            .collect();

        [
            "Node labels and properties:".to_string(),
            nodes.join("\n"),
            "Relationship types and properties:".to_string(),
            rels.join("\n"),
            "The relationships:".to_string(),
            patterns.join("\n"),
        ]
        .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Text2CypherOutcome {
    pub question: String,
    pub cypher_query: String,
    pub is_valid: bool,
    pub execution_results: Vec<Record>,
    pub error: Option<String>,
    /// Set when the query only ran after an automatic fix.
    pub fixed: bool,
}

pub struct Text2CypherService {
    backend: Arc<dyn RetrievalBackend>,
    generator: Arc<dyn TextGenerator>,
}

impl Text2CypherService {
    pub fn new(backend: Arc<dyn RetrievalBackend>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { backend, generator }
    }

    pub async fn structured_schema(&self) -> GraphResult<GraphSchema> {
        let mut schema = GraphSchema::default();

        for row in self.backend.graph_query(NODE_PROPERTIES_QUERY, serde_json::json!({})).await? {
            if let Some(label) = row.get("label").and_then(|v| v.as_str()) {
                let props = row
                    .get("properties")
                    .and_then(|v| v.as_array())
                    .map(|items| items.iter().filter_map(|p| p.as_str().map(str::to_string)).collect())
                    .unwrap_or_default();
                schema.node_properties.insert(label.to_string(), props);
            }
        }

        for row in self.backend.graph_query(REL_TYPES_QUERY, serde_json::json!({})).await? {
            if let Some(rel) = row.get("relationship_type").and_then(|v| v.as_str()) {
                schema.relationship_types.push(rel.to_string());
            }
        }

        for row in self.backend.graph_query(REL_PATTERNS_QUERY, serde_json::json!({})).await? {
            let field = |key: &str| row.get(key).and_then(|v| v.as_str()).map(str::to_string);
            if let (Some(start), Some(rel), Some(end)) = (field("start"), field("type"), field("end")) {
                schema.patterns.push((start, rel, end));
            }
        }

        Ok(schema)
    }

    /// Generate a Cypher statement. Never fails: a missing schema or an
    /// unusable generation falls back to a keyword-pattern query.
    pub async fn generate_cypher(
        &self,
        question: &str,
        terminology: Option<&str>,
        examples: &[CypherExample],
    ) -> String {
        let schema = match self.structured_schema().await {
            Ok(schema) => schema,
            Err(e) => {
                tracing::warn!("⚠️ Schema unavailable, using pattern query: {}", e);
                return fallback_cypher(question);
            }
        };

        let prompt = cypher_prompt(
            question,
            &schema.to_prompt_string(),
            terminology.unwrap_or(DEFAULT_TERMINOLOGY),
            examples,
        );
        match self
            .generator
            .generate(&[ConversationTurn::user(prompt)], GenerationOptions::default())
            .await
        {
            Ok(response) if !response.trim().is_empty() => clean_cypher_response(&response),
            Ok(_) => fallback_cypher(question),
            Err(e) => {
                tracing::warn!("⚠️ Cypher generation failed, using pattern query: {}", e);
                fallback_cypher(question)
            }
        }
    }

    /// Generate with the default terminology and examples, then execute.
    /// A failing query gets one automatic fix attempt.
    pub async fn generate_and_execute(&self, question: &str) -> Text2CypherOutcome {
        let cypher = self.generate_cypher(question, None, &default_examples()).await;
        tracing::info!("🔍 Generated Cypher: {}", cypher);

        let mut outcome = Text2CypherOutcome {
            question: question.to_string(),
            cypher_query: cypher.clone(),
            is_valid: false,
            execution_results: Vec::new(),
            error: None,
            fixed: false,
        };

        match self.backend.graph_query(&cypher, serde_json::json!({})).await {
            Ok(rows) => {
                outcome.is_valid = true;
                outcome.execution_results = rows;
            }
            Err(e) => {
                let message = e.to_string();
                outcome.error = Some(format!("Query execution error: {}", message));

                let fixed = attempt_query_fix(&cypher, &message);
                if fixed != cypher {
                    if let Ok(rows) = self.backend.graph_query(&fixed, serde_json::json!({})).await {
                        outcome.cypher_query = fixed;
                        outcome.is_valid = true;
                        outcome.execution_results = rows;
                        outcome.error = None;
                        outcome.fixed = true;
                    }
                }
            }
        }
        outcome
    }

    /// Seed the small movie graph the default examples and lookups are written against.
    pub async fn load_movie_dataset(&self) -> GraphResult<u64> {
        let rows = self
            .backend
            .graph_query(MOVIE_DATASET_QUERY, serde_json::json!({ "movies": movie_dataset() }))
            .await?;
        let movies = rows.first().and_then(|r| r.get("movies")).and_then(|v| v.as_u64()).unwrap_or(0);
        tracing::info!(movies, "✅ Loaded sample movies dataset");
        Ok(movies)
    }

    pub async fn explain_query(&self, cypher: &str) -> GraphResult<String> {
        let prompt = format!(
            "Explain the following Cypher query in simple, natural language. \
             Describe what data it retrieves and how it works:\n\nCypher Query:\n{}\n\nExplanation:",
            cypher
        );
        let explanation = self
            .generator
            .generate(&[ConversationTurn::user(prompt)], GenerationOptions::default())
            .await?;
        Ok(explanation.trim().to_string())
    }
}

pub fn cypher_prompt(question: &str, schema: &str, terminology: &str, examples: &[CypherExample]) -> String {
    let examples: Vec<String> = examples
        .iter()
        .map(|e| format!("Question: {}\nCypher: {}", e.question, e.cypher))
        .collect();
    format!(
        "Instructions:\n\
         Generate Cypher statement to query a graph database to get the data to answer the following user question.\n\n\
         Graph database schema:\n\
         Use only the provided relationship types and properties in the schema.\n\
         Do not use any other relationship types or properties that are not provided in the schema.\n\
         {schema}\n\n\
         Terminology mapping:\n\
         This section is helpful to map terminology between the user question and the graph database schema.\n\
         {terminology}\n\n\
         Examples:\n\
         The following examples provide useful patterns for querying the graph database.\n\
         {examples}\n\n\
         Format instructions:\n\
         Do not include any explanations or apologies in your responses.\n\
         Do not respond to any questions that might ask anything else than for you to construct a Cypher statement.\n\
         Do not include any text except the generated Cypher statement.\n\
         ONLY RESPOND WITH CYPHER, NO CODE BLOCKS.\n\n\
         User question: {question}\n",
        schema = schema,
        terminology = terminology,
        examples = examples.join("\n"),
        question = question
    )
}

fn movie_dataset() -> serde_json::Value {
    let person = |name: &str, born: i64| serde_json::json!({ "name": name, "born": born });
    let actor = |name: &str, born: i64, role: &str| serde_json::json!({ "name": name, "born": born, "roles": [role] });
    serde_json::json!([
        {
            "title": "The Matrix",
            "released": 1999,
            "tagline": "Welcome to the Real World",
            "cast": [
                actor("Keanu Reeves", 1964, "Neo"),
                actor("Carrie-Anne Moss", 1967, "Trinity"),
                actor("Laurence Fishburne", 1961, "Morpheus"),
            ],
            "directors": [person("Lana Wachowski", 1965)],
        },
        {
            "title": "The Matrix Reloaded",
            "released": 2003,
            "tagline": "Free your mind",
            "cast": [],
            "directors": [],
        },
        {
            "title": "Apollo 13",
            "released": 1995,
            "tagline": "Houston, we have a problem",
            "cast": [
                actor("Tom Hanks", 1956, "Jim Lovell"),
                actor("Kevin Bacon", 1958, "Jack Swigert"),
            ],
            "directors": [person("Ron Howard", 1954)],
        },
    ])
}

/// Extract the query from a generator response: drop code fences, comments
/// and prose, keeping every line from the first clause keyword until the
/// explanation starts.
pub fn clean_cypher_response(response: &str) -> String {
    let unfenced = response.replace("```cypher", "").replace("```", "");
    let mut lines: Vec<&str> = Vec::new();

    for line in unfenced.lines().map(str::trim) {
        if lines.is_empty() {
            if starts_with_clause(line) {
                lines.push(line);
            }
            continue;
        }
        let lower = line.to_lowercase();
        if line.starts_with("//") || line.starts_with('#') || EXPLANATION_MARKERS.iter().any(|m| lower.contains(m)) {
            continue;
        }
        if line.is_empty() || (looks_like_prose(line) && !starts_with_clause(line)) {
            break;
        }
        lines.push(line);
    }

    if lines.is_empty() {
        unfenced.trim().to_string()
    } else {
        lines.join("\n")
    }
}

fn starts_with_clause(line: &str) -> bool {
    let upper = line.to_uppercase();
    CLAUSE_KEYWORDS.iter().any(|k| {
        upper.starts_with(k) && !upper[k.len()..].starts_with(|c: char| c.is_alphanumeric() || c == '_')
    })
}

/// A sentence-cased first word ("This", "It", "Note") opens an explanation.
fn looks_like_prose(line: &str) -> bool {
    let word = line.split_whitespace().next().unwrap_or_default();
    let mut chars = word.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => {
            let rest: Vec<char> = chars.filter(|c| c.is_alphabetic()).collect();
            !rest.is_empty() && rest.iter().all(|c| c.is_lowercase())
        }
        _ => false,
    }
}

/// Lowercase capitalised aggregate functions when the error points at them.
pub fn attempt_query_fix(cypher: &str, error_message: &str) -> String {
    if !(error_message.contains("Unknown function") || error_message.contains("Invalid input")) {
        return cypher.to_string();
    }
    AGGREGATE_FIXES
        .iter()
        .fold(cypher.to_string(), |query, (wrong, right)| query.replace(wrong, right))
}

/// Keyword-pattern query over the movie graph used when generation is impossible.
pub fn fallback_cypher(question: &str) -> String {
    let q = question.to_lowercase();
    let has = |word: &str| q.contains(word);

    if has("tom hanks") && (has("movie") || has("act")) {
        return "MATCH (a:Person)-[:ACTED_IN]->(m:Movie) WHERE toLower(a.name) CONTAINS 'tom hanks' \
                RETURN m.title AS title, m.released AS year ORDER BY m.released DESC"
            .to_string();
    }
    if has("matrix") {
        return if has("direct") {
            "MATCH (d:Person)-[:DIRECTED]->(m:Movie) WHERE toLower(m.title) CONTAINS 'matrix' \
             RETURN d.name AS director, m.title AS movie"
        } else {
            "MATCH (m:Movie) WHERE toLower(m.title) CONTAINS 'matrix' \
             RETURN m.title AS title, m.released AS year ORDER BY m.released"
        }
        .to_string();
    }
    if has("1999") {
        return "MATCH (m:Movie) WHERE m.released = 1999 RETURN m.title AS title, m.released AS year ORDER BY m.title"
            .to_string();
    }
    if has("apollo 13") && (has("actor") || has("cast")) {
        return "MATCH (a:Person)-[:ACTED_IN]->(m:Movie) WHERE toLower(m.title) CONTAINS 'apollo 13' \
                RETURN a.name AS actor, m.title AS movie ORDER BY a.name"
            .to_string();
    }
    if has("action") && has("before") && has("1995") {
        return "MATCH (m:Movie)-[:IN_GENRE]->(g:Genre) WHERE g.name = 'Action' AND m.released < 1995 \
                RETURN m.title AS title, m.released AS year ORDER BY m.released DESC"
            .to_string();
    }
    if let Some(genre) = ["action", "comedy", "drama", "thriller", "horror"].into_iter().find(|g| has(g)) {
        return format!(
            "MATCH (m:Movie)-[:IN_GENRE]->(g:Genre) WHERE toLower(g.name) = '{}' \
             RETURN m.title AS title, m.released AS year ORDER BY m.released DESC LIMIT 10",
            genre
        );
    }
    if has("acted") || has("actor") {
        return "MATCH (a:Person)-[:ACTED_IN]->(m:Movie) RETURN a.name AS actor, m.title AS movie ORDER BY a.name LIMIT 10"
            .to_string();
    }
    if has("directed") || has("director") {
        return "MATCH (d:Person)-[:DIRECTED]->(m:Movie) RETURN d.name AS director, m.title AS movie ORDER BY d.name LIMIT 10"
            .to_string();
    }
    if has("movie") {
        return "MATCH (m:Movie) RETURN m.title AS title, m.released AS year ORDER BY m.released DESC LIMIT 10"
            .to_string();
    }
    "MATCH (n) RETURN n LIMIT 10".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_strips_fences_and_prose() {
        let response = "```cypher\n// find movies\nMATCH (m:Movie)\nThis query finds movies\nRETURN m.title\n```";
        assert_eq!(clean_cypher_response(response), "MATCH (m:Movie)\nRETURN m.title");
    }

    #[test]
    fn test_clean_keeps_continuation_lines() {
        let response = "Here is the query:\n```cypher\nMATCH (m:Movie)\nWHERE m.title CONTAINS 'Matrix'\n  AND m.released > 2000\nRETURN m.title\n  ORDER BY m.released\n```\n\nThis returns every later Matrix sequel.";
        assert_eq!(
            clean_cypher_response(response),
            "MATCH (m:Movie)\nWHERE m.title CONTAINS 'Matrix'\nAND m.released > 2000\nRETURN m.title\nORDER BY m.released"
        );
    }

    #[test]
    fn test_clean_stops_at_trailing_explanation() {
        let response = "MATCH (p:Person)-[:ACTED_IN]->(m:Movie)\nRETURN p.name, count(m) AS movies\nIt counts the movies for each actor.";
        assert_eq!(
            clean_cypher_response(response),
            "MATCH (p:Person)-[:ACTED_IN]->(m:Movie)\nRETURN p.name, count(m) AS movies"
        );
    }

    #[test]
    fn test_clean_keeps_text_without_keywords() {
        assert_eq!(clean_cypher_response("  nothing useful  "), "nothing useful");
    }

    #[test]
    fn test_fallback_patterns() {
        assert!(fallback_cypher("Who directed The Matrix?").contains("DIRECTED"));
        assert!(fallback_cypher("Show me some comedy").contains("'comedy'"));
        assert!(fallback_cypher("Which movies did Tom Hanks act in?").contains("tom hanks"));
        assert_eq!(fallback_cypher("What is the meaning of life?"), "MATCH (n) RETURN n LIMIT 10");
    }

    #[test]
    fn test_fix_only_on_matching_errors() {
        let query = "MATCH (m) RETURN Count(m)";
        assert_eq!(attempt_query_fix(query, "Unknown function 'Count'"), "MATCH (m) RETURN count(m)");
        assert_eq!(attempt_query_fix(query, "Connection refused"), query);
    }

    #[test]
    fn test_schema_prompt_string() {
        let mut schema = GraphSchema::default();
        schema.node_properties.insert("Movie".into(), vec!["title".into(), "released".into()]);
        schema.relationship_types.push("ACTED_IN".into());
        schema.patterns.push(("Person".into(), "ACTED_IN".into(), "Movie".into()));

        let text = schema.to_prompt_string();
        assert!(text.contains("Movie {title: STRING, released: STRING}"));
        assert!(text.contains("ACTED_IN {}"));
        assert!(text.contains("(:Person)-[:ACTED_IN]->(:Movie)"));
    }

    #[test]
    fn test_prompt_includes_examples() {
        let prompt = cypher_prompt("q?", "schema", DEFAULT_TERMINOLOGY, &default_examples());
        assert!(prompt.contains("Question: In what country was the movie Ready Player One produced?"));
        assert!(prompt.ends_with("User question: q?\n"));
    }
}
