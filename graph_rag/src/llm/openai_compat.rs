use std::time::{Duration, Instant};

use async_trait::async_trait;
use kgrag_models::{ConversationTurn, ToolSelection, ToolSpec};
use kgrag_observability::log_external_call;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{json as salvage, GenerationOptions, ResponseFormat, TextGenerator};
use crate::errors::{GraphError, GraphResult};

/// Client for OpenAI-compatible `/chat/completions` endpoints (Groq, OpenAI).
#[derive(Clone)]
pub struct ChatCompletionsClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    /// Some servers send `null` rather than omitting the field.
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Deserialize)]
struct ToolCall {
    function: FunctionCall,
}

#[derive(Deserialize)]
struct FunctionCall {
    name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    arguments: String,
}

impl ChatCompletionsClient {
    pub fn new(base_url: &str, api_key: String, model: &str, timeout: Duration) -> GraphResult<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            temperature: 0.0,
        })
    }

    /// Temperature used when the caller does not set one.
    pub fn with_default_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn messages(messages: &[ConversationTurn]) -> Vec<serde_json::Value> {
        messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect()
    }

    async fn complete(&self, body: serde_json::Value) -> GraphResult<ResponseMessage> {
        let url = format!("{}/chat/completions", self.base_url);
        log_external_call!("chat_completions", url.as_str());
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        log_external_call!(
            "chat_completions",
            url.as_str(),
            start.elapsed().as_millis() as u64,
            status.as_u16()
        );
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("❌ LLM provider error {}: {}", status, error_text);
            return Err(GraphError::Llm(format!("{} - {}", status, error_text)));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| GraphError::Llm("response contained no choices".to_string()))
    }
}

#[async_trait]
impl TextGenerator for ChatCompletionsClient {
    async fn generate(&self, messages: &[ConversationTurn], options: GenerationOptions) -> GraphResult<String> {
        let mut body = json!({
            "model": self.model,
            "messages": Self::messages(messages),
            "temperature": options.temperature.unwrap_or(self.temperature),
        });
        if options.response_format == ResponseFormat::Json {
            body["response_format"] = json!({"type": "json_object"});
        }
        let message = self.complete(body).await?;
        Ok(message.content.unwrap_or_default())
    }

    async fn generate_with_tools(
        &self,
        messages: &[ConversationTurn],
        tools: &[ToolSpec],
    ) -> GraphResult<ToolSelection> {
        let body = json!({
            "model": self.model,
            "messages": Self::messages(messages),
            "temperature": self.temperature,
            "tools": tools.iter().map(ToolSpec::to_function_json).collect::<Vec<_>>(),
            "tool_choice": "auto",
        });
        let message = self.complete(body).await?;

        let Some(call) = message.tool_calls.unwrap_or_default().into_iter().next() else {
            return Ok(ToolSelection::None);
        };
        let arguments = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            salvage::salvage_json(&call.function.arguments).ok_or_else(|| {
                GraphError::MalformedOutput(format!("tool arguments for {}", call.function.name))
            })?
        };
        Ok(ToolSelection::call(call.function.name, arguments))
    }
}
