//! OpenAI-compatible chat completions client used as the query rewriter.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use docsearch_core::config::ModelSettings;
use docsearch_core::traits::Generator;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct ChatResponse {
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
}

impl ChatResponse {
    pub(crate) fn into_text(self) -> Result<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("completion returned no content"))
    }
}

pub struct ChatCompletionsGenerator {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

impl ChatCompletionsGenerator {
    pub fn new(url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            model: model.into(),
            api_key,
            temperature: ModelSettings::default().generator_temperature,
        }
    }

    /// `None` when no endpoint is configured.
    pub fn from_settings(models: &ModelSettings) -> Option<Self> {
        let url = models.generator_url.as_deref()?;
        let api_key = models
            .generator_api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Some(
            Self::new(url, models.generator_model.clone(), api_key)
                .with_temperature(models.generator_temperature),
        )
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
        };
        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response: ChatResponse = request.send().await?.error_for_status()?.json().await?;
        let text = response.into_text()?;
        debug!(model = %self.model, chars = text.len(), "completion received");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_choice() {
        let raw = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"1. a\n2. b"}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).expect("json");
        assert_eq!(parsed.into_text().expect("text"), "1. a\n2. b");
    }

    #[test]
    fn empty_choices_are_an_error() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).expect("json");
        assert!(parsed.into_text().is_err());
    }

    #[test]
    fn request_shape() {
        let body = ChatRequest {
            model: "m",
            messages: [ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.5,
        };
        let v = serde_json::to_value(&body).expect("serialize");
        assert_eq!(v["messages"][0]["role"], "user");
        assert_eq!(v["model"], "m");
    }

    #[test]
    fn settings_carry_endpoint_and_temperature() {
        let models = ModelSettings {
            generator_url: Some("http://localhost:11434/v1/chat/completions".into()),
            generator_model: "llama3".into(),
            generator_temperature: 0.2,
            generator_api_key_env: None,
            ..ModelSettings::default()
        };
        let generator = ChatCompletionsGenerator::from_settings(&models).expect("configured");
        assert_eq!(generator.model, "llama3");
        assert!(generator.api_key.is_none());
        assert!((generator.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn unconfigured_endpoint_yields_none() {
        assert!(ChatCompletionsGenerator::from_settings(&ModelSettings::default()).is_none());
    }
}
