//! Language-model text service. Only the OpenAI-compatible chat-completions
//! shape is spoken.

use async_trait::async_trait;
use harvest_storage::{FetchError, JsonHttpClient};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("model returned no content")]
    EmptyResponse,
}

#[async_trait]
pub trait TextModel: Send + Sync {
    /// Identifier recorded on records this model polished.
    fn model_id(&self) -> &str;

    /// Send one prompt and return the raw text of the reply, which the caller
    /// expects to be a JSON object.
    async fn complete_json(&self, prompt: &str) -> Result<String, ModelError>;
}

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    response_format: ResponseFormat,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn first_content(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiChatModel {
    http: JsonHttpClient,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(
        http: JsonHttpClient,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            temperature: 0.2,
            response_format: ResponseFormat { kind: "json_object" },
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        }
    }
}

#[async_trait]
impl TextModel for OpenAiChatModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete_json(&self, prompt: &str) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response: ChatResponse = self
            .http
            .post_json(&url, &self.request(prompt), Some(&self.api_key))
            .await?;
        response.first_content().ok_or(ModelError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_storage::HttpClientConfig;
    use serde_json::json;

    #[test]
    fn request_asks_for_a_json_object_at_low_temperature() {
        let http = JsonHttpClient::new(HttpClientConfig::default()).expect("client");
        let model = OpenAiChatModel::new(http, "https://llm.example.org/v1/", "k", "gpt-4o-mini");
        let body = serde_json::to_value(model.request("hello")).expect("serialize");
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["response_format"], json!({ "type": "json_object" }));
        assert_eq!(body["messages"], json!([{ "role": "user", "content": "hello" }]));
        assert!((body["temperature"].as_f64().expect("temperature") - 0.2).abs() < 1e-6);
        assert_eq!(model.base_url, "https://llm.example.org/v1");
    }

    #[test]
    fn blank_or_missing_choice_is_empty() {
        let blank: ChatResponse =
            serde_json::from_value(json!({ "choices": [{ "message": { "content": "  " } }] }))
                .expect("parse");
        assert_eq!(blank.first_content(), None);

        let none: ChatResponse = serde_json::from_value(json!({ "choices": [] })).expect("parse");
        assert_eq!(none.first_content(), None);

        let some: ChatResponse =
            serde_json::from_value(json!({ "choices": [{ "message": { "content": "{}" } }] }))
                .expect("parse");
        assert_eq!(some.first_content().as_deref(), Some("{}"));
    }
}
