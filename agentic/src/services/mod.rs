pub mod orchestrator;
pub mod tools;

pub use orchestrator::{AgenticRouter, Route, MAX_PASSES, NO_ANSWER};
pub use tools::{Tool, ToolCall, ToolExecutor};
