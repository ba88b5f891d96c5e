use kgrag_models::ConversationTurn;
use serde::{Deserialize, Serialize};

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_number: usize,
    /// 1 for the first rewrite/route/execute pass, 2 for the follow-up pass.
    pub pass: usize,
    /// The rewritten question the tool was routed for.
    pub question: String,
    pub tool_used: String,
    pub arguments: serde_json::Value,
    pub reasoning: String,
    pub result: Vec<serde_json::Value>,
    pub execution_time_ms: u64,
}

impl ExecutionStep {
    /// First `{"error": ...}` entry of the result, if any.
    pub fn error(&self) -> Option<&str> {
        self.result
            .iter()
            .find_map(|entry| entry.get("error").and_then(|e| e.as_str()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgenticAnswer {
    pub question: String,
    pub answer: String,
    pub passes: usize,
    /// Follow-up questions from the critique of the first pass.
    pub critique_questions: Vec<String>,
    pub steps: Vec<ExecutionStep>,
    /// Assistant turns accumulated across passes.
    pub turns: Vec<ConversationTurn>,
    pub execution_time_ms: u64,
}
