use std::sync::Arc;
use std::time::Instant;

use graph_rag::graph_db::RetrievalBackend;
use graph_rag::llm::json::parse_salvaged;
use graph_rag::{GenerationOptions, GraphError, GraphResult, TextGenerator};
use kgrag_models::{ConversationTurn, ToolSelection};
use kgrag_observability::{log_timed, log_tool_executed};
use serde::Deserialize;
use serde_json::json;

use super::tools::{Tool, ToolExecutor};
use crate::models::{AgenticAnswer, ExecutionStep};
use crate::prompts;

/// One routed pass plus at most one follow-up pass driven by the critique.
pub const MAX_PASSES: usize = 2;

pub const NO_ANSWER: &str = "Unable to generate a response.";

const SERVICE: &str = "agentic";

#[derive(Deserialize)]
struct Rewrite {
    #[serde(default)]
    question: Option<String>,
}

#[derive(Deserialize)]
struct Critique {
    #[serde(default)]
    questions: Vec<String>,
}

/// The tool a pass will run, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub reasoning: String,
}

impl Route {
    fn fallback(question: &str, reason: impl Into<String>) -> Self {
        Self {
            tool_name: Tool::Text2Cypher.as_str().to_string(),
            arguments: json!({ "question": question }),
            reasoning: reason.into(),
        }
    }
}

/// Rewrite, route, execute and critique a question, then synthesize an
/// answer from the accumulated turns.
pub struct AgenticRouter {
    generator: Arc<dyn TextGenerator>,
    tools: ToolExecutor,
}

impl AgenticRouter {
    pub fn new(backend: Arc<dyn RetrievalBackend>, generator: Arc<dyn TextGenerator>) -> Self {
        let tools = ToolExecutor::new(backend, generator.clone());
        Self { generator, tools }
    }

    pub fn tools(&self) -> &ToolExecutor {
        &self.tools
    }

    /// Answer `question`. Only a blank question is an error; every backend
    /// failure after that degrades the answer instead.
    pub async fn answer(&self, question: &str) -> GraphResult<AgenticAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(GraphError::InvalidInput("question is empty".to_string()));
        }

        let start = Instant::now();
        tracing::info!(max_passes = MAX_PASSES, "🤖 Agentic RAG: Starting query execution");

        let mut turns = Vec::new();
        let mut steps = Vec::new();

        self.run_pass(question, 1, &mut turns, &mut steps).await;
        let mut passes = 1;

        let critique_questions = self.critique(question, &turns).await;
        if !critique_questions.is_empty() && passes < MAX_PASSES {
            tracing::info!(follow_ups = critique_questions.len(), "🔍 Critique asked for follow-ups");
            passes += 1;
            self.run_pass(&critique_questions.join(" "), passes, &mut turns, &mut steps)
                .await;
        }

        let answer = self.synthesize(question, &turns).await;
        let execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            passes,
            steps = steps.len(),
            duration_ms = execution_time_ms,
            "✅ Agentic RAG: answered"
        );

        Ok(AgenticAnswer {
            question: question.to_string(),
            answer,
            passes,
            critique_questions,
            steps,
            turns,
            execution_time_ms,
        })
    }

    async fn run_pass(
        &self,
        input: &str,
        pass: usize,
        turns: &mut Vec<ConversationTurn>,
        steps: &mut Vec<ExecutionStep>,
    ) {
        let question = self.rewrite(input, turns).await;
        let route = self.route(&question, turns).await;

        let started = Instant::now();
        let result = self.tools.execute(&route.tool_name, route.arguments.clone()).await;
        let step = ExecutionStep {
            step_number: steps.len() + 1,
            pass,
            question: question.clone(),
            tool_used: route.tool_name,
            arguments: route.arguments,
            reasoning: route.reasoning,
            result,
            execution_time_ms: started.elapsed().as_millis() as u64,
        };
        log_tool_executed(SERVICE, &step.tool_used, step.execution_time_ms, step.error());

        turns.push(ConversationTurn::assistant(prompts::answer_turn(&question, &step.result)));
        steps.push(step);
    }

    /// Make the question atomic using earlier turns. Keeps `question` when the
    /// generator fails or replies with anything unusable.
    pub async fn rewrite(&self, question: &str, turns: &[ConversationTurn]) -> String {
        let messages = conversation(prompts::QUERY_UPDATE_PROMPT, turns, prompts::rewrite_request(question));
        let raw = match self.generator.generate(&messages, GenerationOptions::json()).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "⚠️ Question rewrite failed");
                return question.to_string();
            }
        };
        match parse_salvaged::<Rewrite>(&raw) {
            Ok(Rewrite { question: Some(updated) }) if !updated.trim().is_empty() => updated.trim().to_string(),
            Ok(_) => question.to_string(),
            Err(e) => {
                tracing::debug!(error = %e, "Rewrite reply unusable, keeping question");
                question.to_string()
            }
        }
    }

    /// Let the generator pick a tool; falls back to text2cypher when it picks none.
    pub async fn route(&self, question: &str, turns: &[ConversationTurn]) -> Route {
        let messages = conversation(prompts::TOOL_PICKER_PROMPT, turns, prompts::route_request(question));
        match self.generator.generate_with_tools(&messages, &self.tools.specs()).await {
            Ok(ToolSelection::Call { tool_name, arguments }) => {
                tracing::info!(tool = %tool_name, "🤖 Routed question to tool");
                Route {
                    reasoning: format!("Selected {} for: '{}'", tool_name, question),
                    tool_name,
                    arguments,
                }
            }
            Ok(ToolSelection::None) => Route::fallback(question, "No tool selected, falling back to text2cypher"),
            Err(e) => {
                tracing::warn!(error = %e, "⚠️ Tool selection failed");
                Route::fallback(question, format!("Tool selection failed ({}), falling back to text2cypher", e))
            }
        }
    }

    /// Follow-up questions for whatever the turns leave unanswered. Empty
    /// when satisfied or when the reply cannot be used.
    pub async fn critique(&self, question: &str, turns: &[ConversationTurn]) -> Vec<String> {
        let messages = conversation(prompts::ANSWER_CRITIQUE_PROMPT, turns, prompts::critique_request(question));
        let raw = match self.generator.generate(&messages, GenerationOptions::json()).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, "⚠️ Answer critique failed");
                return Vec::new();
            }
        };
        match parse_salvaged::<Critique>(&raw) {
            Ok(critique) => critique
                .questions
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "Critique reply unusable, treating as satisfied");
                Vec::new()
            }
        }
    }

    pub async fn synthesize(&self, question: &str, turns: &[ConversationTurn]) -> String {
        let messages = conversation(prompts::MAIN_PROMPT, turns, prompts::answer_request(question));
        let generated = log_timed!("agentic_synthesize", {
            self.generator.generate(&messages, GenerationOptions::default()).await
        });
        match generated {
            Ok(answer) if !answer.trim().is_empty() => answer,
            Ok(_) => NO_ANSWER.to_string(),
            Err(e) => {
                tracing::error!(error = %e, "❌ Final answer generation failed");
                NO_ANSWER.to_string()
            }
        }
    }
}

fn conversation(system: &str, turns: &[ConversationTurn], request: String) -> Vec<ConversationTurn> {
    let mut messages = Vec::with_capacity(turns.len() + 2);
    messages.push(ConversationTurn::system(system));
    messages.extend_from_slice(turns);
    messages.push(ConversationTurn::user(request));
    messages
}
