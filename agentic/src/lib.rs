//! Agentic question answering over the knowledge graph: rewrite the
//! question, route it to a graph tool, critique the result and synthesize
//! an answer.

pub mod models;
pub mod prompts;
pub mod services;

pub use models::{AgenticAnswer, ExecutionStep};
pub use services::{AgenticRouter, Tool, ToolExecutor, MAX_PASSES};
