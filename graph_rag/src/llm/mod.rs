pub mod embedding;
pub mod gemini;
pub mod json;
pub mod openai_compat;

pub use embedding::HttpEmbedder;
pub use gemini::GeminiClient;
pub use openai_compat::ChatCompletionsClient;

use std::sync::Arc;

use async_trait::async_trait;
use kgrag_config::{AppConfig, LlmProvider};
use kgrag_models::{ConversationTurn, ToolSelection, ToolSpec};
use serde::Deserialize;

use crate::errors::{GraphError, GraphResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Ask the provider for a single JSON object.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GenerationOptions {
    /// `None` uses the client's configured temperature.
    pub temperature: Option<f32>,
    pub response_format: ResponseFormat,
}

impl GenerationOptions {
    pub fn json() -> Self {
        Self {
            response_format: ResponseFormat::Json,
            ..Self::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A text-generation backend taking role-tagged messages.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, messages: &[ConversationTurn], options: GenerationOptions) -> GraphResult<String>;

    /// Offer `tools` and report which one, if any, the model chose.
    ///
    /// Providers without native tool calling describe the tools in an extra
    /// system turn and parse a JSON reply.
    async fn generate_with_tools(
        &self,
        messages: &[ConversationTurn],
        tools: &[ToolSpec],
    ) -> GraphResult<ToolSelection> {
        let mut prompt = messages.to_vec();
        prompt.push(ConversationTurn::system(describe_tools(tools)));
        let raw = self.generate(&prompt, GenerationOptions::json()).await?;
        Ok(parse_tool_reply(&raw, tools))
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> GraphResult<Vec<f32>>;

    fn dimension(&self) -> usize;
}

fn describe_tools(tools: &[ToolSpec]) -> String {
    let listing: Vec<serde_json::Value> = tools
        .iter()
        .map(|t| serde_json::json!({"name": t.name, "description": t.description, "parameters": t.parameters}))
        .collect();
    format!(
        "You can call exactly one of these tools:\n{}\n\n\
         Reply with a JSON object {{\"tool\": <tool name>, \"arguments\": {{...}}}}. \
         Reply with {{\"tool\": null}} if no tool fits.",
        serde_json::to_string_pretty(&listing).unwrap_or_default()
    )
}

#[derive(Deserialize)]
struct ToolReply {
    tool: Option<String>,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Unknown tool names are passed through; the caller decides how to report them.
fn parse_tool_reply(raw: &str, tools: &[ToolSpec]) -> ToolSelection {
    match json::parse_salvaged::<ToolReply>(raw) {
        Ok(ToolReply { tool: Some(name), arguments }) if !name.trim().is_empty() => {
            if !tools.iter().any(|t| t.name == name) {
                tracing::warn!("🤖 Generator picked an unoffered tool: {}", name);
            }
            let arguments = if arguments.is_null() { serde_json::json!({}) } else { arguments };
            ToolSelection::call(name, arguments)
        }
        Ok(_) => ToolSelection::None,
        Err(e) => {
            tracing::warn!("🤖 Could not parse tool choice: {}", e);
            ToolSelection::None
        }
    }
}

/// Build the configured text generator.
pub fn build_generator(config: &AppConfig) -> GraphResult<Arc<dyn TextGenerator>> {
    let llm = &config.llm;
    let api_key = llm
        .api_key
        .clone()
        .ok_or_else(|| GraphError::Llm(format!("{} API key is not set", llm.provider.as_str())))?;

    Ok(match llm.provider {
        LlmProvider::Groq | LlmProvider::OpenAi => Arc::new(
            ChatCompletionsClient::new(&llm.base_url, api_key, &llm.model, llm.timeout)?
                .with_default_temperature(llm.temperature),
        ),
        LlmProvider::Gemini => Arc::new(
            GeminiClient::new(&llm.base_url, api_key, &llm.model, llm.timeout)?
                .with_default_temperature(llm.temperature),
        ),
    })
}

pub fn build_embedder(config: &AppConfig) -> GraphResult<Arc<dyn Embedder>> {
    let embedding = &config.embedding;
    Ok(Arc::new(HttpEmbedder::new(&embedding.url, embedding.dimension, embedding.timeout)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs() -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: "text2cypher".into(),
            description: "Query the database".into(),
            parameters: json!({"type": "object"}),
        }]
    }

    #[test]
    fn test_parse_tool_reply() {
        let selection = parse_tool_reply(r#"{"tool": "text2cypher", "arguments": {"question": "q"}}"#, &specs());
        assert_eq!(selection, ToolSelection::call("text2cypher", json!({"question": "q"})));
    }

    #[test]
    fn test_null_tool_and_garbage_mean_none() {
        assert!(parse_tool_reply(r#"{"tool": null}"#, &specs()).is_none());
        assert!(parse_tool_reply("I would rather not", &specs()).is_none());
    }

    #[test]
    fn test_missing_arguments_become_empty_object() {
        let selection = parse_tool_reply(r#"{"tool": "text2cypher"}"#, &specs());
        assert_eq!(selection, ToolSelection::call("text2cypher", json!({})));
    }

    #[test]
    fn test_describe_tools_lists_names() {
        assert!(describe_tools(&specs()).contains("text2cypher"));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_build_generator_applies_configured_temperature() {
        use wiremock::matchers::{body_partial_json, method};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"temperature": 0.25})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        std::env::set_var("LLM_PROVIDER", "openai");
        std::env::set_var("OPENAI_API_KEY", "test-key");
        std::env::set_var("LLM_BASE_URL", server.uri());
        std::env::set_var("LLM_TEMPERATURE", "0.25");
        let config = AppConfig::from_env();
        for key in ["LLM_PROVIDER", "OPENAI_API_KEY", "LLM_BASE_URL", "LLM_TEMPERATURE"] {
            std::env::remove_var(key);
        }

        let generator = build_generator(&config.unwrap()).unwrap();
        let reply = generator
            .generate(&[ConversationTurn::user("hi")], GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(reply, "ok");
    }
}
