use std::time::{Duration, Instant};

use async_trait::async_trait;
use kgrag_models::{ConversationTurn, Role};
use kgrag_observability::log_external_call;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{GenerationOptions, ResponseFormat, TextGenerator};
use crate::errors::{GraphError, GraphResult};

/// Client for the Gemini `generateContent` API.
///
/// Tool selection uses the prompt-described default of [`TextGenerator`].
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
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

    /// System turns become the system instruction; the rest alternate user/model.
    fn payload(&self, messages: &[ConversationTurn], options: GenerationOptions) -> serde_json::Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let contents: Vec<serde_json::Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = if m.role == Role::Assistant { "model" } else { "user" };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut generation_config = json!({"temperature": options.temperature.unwrap_or(self.temperature)});
        if options.response_format == ResponseFormat::Json {
            generation_config["responseMimeType"] = json!("application/json");
        }

        let mut body = json!({"contents": contents, "generationConfig": generation_config});
        if !system.is_empty() {
            body["systemInstruction"] = json!({"parts": [{"text": system.join("\n\n")}]});
        }
        body
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, messages: &[ConversationTurn], options: GenerationOptions) -> GraphResult<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        log_external_call!("gemini", url.as_str());
        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&self.payload(messages, options))
            .send()
            .await?;

        let status = response.status();
        log_external_call!("gemini", url.as_str(), start.elapsed().as_millis() as u64, status.as_u16());
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            tracing::error!("❌ Gemini error {}: {}", status, error_text);
            return Err(GraphError::Llm(format!("{} - {}", status, error_text)));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::Llm("response contained no candidates".to_string()))?;
        Ok(candidate
            .content
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_payload_splits_system_instruction() {
        let client = GeminiClient::new("http://localhost", "k".into(), "m", Duration::from_secs(1))
            .unwrap()
            .with_default_temperature(0.5);
        let body = client.payload(
            &[
                ConversationTurn::system("be brief"),
                ConversationTurn::user("hi"),
                ConversationTurn::assistant("hello"),
            ],
            GenerationOptions::json(),
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert_eq!(body["contents"].as_array().unwrap().len(), 2);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["temperature"], 0.5);

        let pinned = client.payload(&[], GenerationOptions::default().with_temperature(0.0));
        assert_eq!(pinned["generationConfig"]["temperature"], 0.0);
    }

    #[tokio::test]
    async fn test_generate_joins_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-1.5-flash:generateContent"))
            .and(query_param("key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Hel"}, {"text": "lo"}]}}]
            })))
            .mount(&server)
            .await;

        let client =
            GeminiClient::new(&server.uri(), "secret".into(), "gemini-1.5-flash", Duration::from_secs(5)).unwrap();
        let text = client
            .generate(&[ConversationTurn::user("hi")], GenerationOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "Hello");
    }
}
