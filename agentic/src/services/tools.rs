use std::sync::Arc;

use graph_rag::graph_db::{Record, RetrievalBackend};
use graph_rag::services::Text2CypherService;
use graph_rag::{GraphResult, TextGenerator};
use kgrag_models::ToolSpec;
use serde::Deserialize;
use serde_json::{json, Value};

const MOVIE_BY_TITLE_QUERY: &str = "\
MATCH (m:Movie)
WHERE toLower(m.title) CONTAINS $title
OPTIONAL MATCH (m)<-[:ACTED_IN]-(a:Person)
OPTIONAL MATCH (m)<-[:DIRECTED]-(d:Person)
RETURN m AS movie, collect(a.name) AS cast, collect(d.name) AS directors";

const MOVIES_BY_ACTOR_QUERY: &str = "\
MATCH (a:Person)-[:ACTED_IN]->(m:Movie)
WHERE toLower(a.name) CONTAINS $actor
OPTIONAL MATCH (m)<-[:ACTED_IN]-(a2:Person)
OPTIONAL MATCH (m)<-[:DIRECTED]-(d:Person)
RETURN m AS movie, collect(a2.name) AS cast, collect(d.name) AS directors";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    MovieInfoByTitle,
    MoviesInfoByActor,
    Text2Cypher,
    AnswerGiven,
}

impl Tool {
    pub const ALL: [Tool; 4] = [
        Tool::MovieInfoByTitle,
        Tool::MoviesInfoByActor,
        Tool::Text2Cypher,
        Tool::AnswerGiven,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "movie_info_by_title" => Some(Tool::MovieInfoByTitle),
            "movies_info_by_actor" => Some(Tool::MoviesInfoByActor),
            "text2cypher" => Some(Tool::Text2Cypher),
            "answer_given" => Some(Tool::AnswerGiven),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::MovieInfoByTitle => "movie_info_by_title",
            Tool::MoviesInfoByActor => "movies_info_by_actor",
            Tool::Text2Cypher => "text2cypher",
            Tool::AnswerGiven => "answer_given",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Tool::MovieInfoByTitle => "Get information about a movie by providing the title",
            Tool::MoviesInfoByActor => "Get information about movies by providing an actor name",
            Tool::Text2Cypher => {
                "Query the database with a user question. When other tools don't fit, fallback to use this one."
            }
            Tool::AnswerGiven => {
                "If a complete answer to the question is already provided in the conversation, use this tool to extract it."
            }
        }
    }

    /// The single string argument every tool takes, with its description.
    fn parameter(&self) -> (&'static str, &'static str) {
        match self {
            Tool::MovieInfoByTitle => ("title", "The movie title"),
            Tool::MoviesInfoByActor => ("actor", "The actor name"),
            Tool::Text2Cypher => ("question", "The user question to find the answer for"),
            Tool::AnswerGiven => ("answer", "The answer to the question"),
        }
    }

    pub fn spec(&self) -> ToolSpec {
        let (name, description) = self.parameter();
        ToolSpec {
            name: self.as_str().to_string(),
            description: self.description().to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    name: {"type": "string", "description": description}
                },
                "required": [name],
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TitleArgs {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ActorArgs {
    actor: String,
}

#[derive(Debug, Deserialize)]
struct QuestionArgs {
    question: String,
}

#[derive(Debug, Deserialize)]
struct AnswerArgs {
    answer: String,
}

/// A tool together with its decoded arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    MovieInfoByTitle { title: String },
    MoviesInfoByActor { actor: String },
    Text2Cypher { question: String },
    AnswerGiven { answer: String },
}

impl ToolCall {
    pub fn decode(tool: Tool, arguments: Value) -> Result<Self, serde_json::Error> {
        Ok(match tool {
            Tool::MovieInfoByTitle => {
                let TitleArgs { title } = serde_json::from_value(arguments)?;
                ToolCall::MovieInfoByTitle { title }
            }
            Tool::MoviesInfoByActor => {
                let ActorArgs { actor } = serde_json::from_value(arguments)?;
                ToolCall::MoviesInfoByActor { actor }
            }
            Tool::Text2Cypher => {
                let QuestionArgs { question } = serde_json::from_value(arguments)?;
                ToolCall::Text2Cypher { question }
            }
            Tool::AnswerGiven => {
                let AnswerArgs { answer } = serde_json::from_value(arguments)?;
                ToolCall::AnswerGiven { answer }
            }
        })
    }

    pub fn tool(&self) -> Tool {
        match self {
            ToolCall::MovieInfoByTitle { .. } => Tool::MovieInfoByTitle,
            ToolCall::MoviesInfoByActor { .. } => Tool::MoviesInfoByActor,
            ToolCall::Text2Cypher { .. } => Tool::Text2Cypher,
            ToolCall::AnswerGiven { .. } => Tool::AnswerGiven,
        }
    }
}

pub fn error_entry(message: impl std::fmt::Display) -> Value {
    json!({ "error": message.to_string() })
}

/// Runs the closed tool set against the graph.
pub struct ToolExecutor {
    backend: Arc<dyn RetrievalBackend>,
    text2cypher: Text2CypherService,
}

impl ToolExecutor {
    pub fn new(backend: Arc<dyn RetrievalBackend>, generator: Arc<dyn TextGenerator>) -> Self {
        let text2cypher = Text2CypherService::new(backend.clone(), generator);
        Self { backend, text2cypher }
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        Tool::ALL.iter().map(Tool::spec).collect()
    }

    /// Dispatch a generator-chosen tool by name. Never fails: unknown names,
    /// undecodable arguments and handler errors become `{"error": ...}` entries.
    pub async fn execute(&self, tool_name: &str, arguments: Value) -> Vec<Value> {
        let Some(tool) = Tool::from_name(tool_name) else {
            tracing::warn!(tool = %tool_name, "⚠️ Unknown tool requested");
            return vec![error_entry(format!("Unknown function: {}", tool_name))];
        };
        match ToolCall::decode(tool, arguments) {
            Ok(call) => self.run(&call).await,
            Err(e) => vec![error_entry(format!("Error calling function: {}", e))],
        }
    }

    pub async fn run(&self, call: &ToolCall) -> Vec<Value> {
        tracing::info!(tool = call.tool().as_str(), "🔷 Executing tool");
        match call {
            ToolCall::MovieInfoByTitle { title } => self
                .movie_query(MOVIE_BY_TITLE_QUERY, json!({ "title": title.to_lowercase() }))
                .await
                .unwrap_or_else(|e| vec![error_entry(format!("Error querying movie by title: {}", e))]),
            ToolCall::MoviesInfoByActor { actor } => self
                .movie_query(MOVIES_BY_ACTOR_QUERY, json!({ "actor": actor.to_lowercase() }))
                .await
                .unwrap_or_else(|e| vec![error_entry(format!("Error querying movies by actor: {}", e))]),
            ToolCall::Text2Cypher { question } => {
                let outcome = self.text2cypher.generate_and_execute(question).await;
                if outcome.is_valid {
                    outcome.execution_results
                } else {
                    let reason = outcome.error.unwrap_or_else(|| "query failed".to_string());
                    vec![error_entry(format!("Error with text2cypher: {}", reason))]
                }
            }
            ToolCall::AnswerGiven { answer } => vec![Value::String(answer.clone())],
        }
    }

    async fn movie_query(&self, cypher: &str, params: Value) -> GraphResult<Vec<Record>> {
        self.backend.graph_query(cypher, params).await
    }
}
