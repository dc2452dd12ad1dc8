//! Chat completion over an OpenAI-compatible HTTP API (Groq by default).

use crate::config::CompletionConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::services::{ChatMessage, CompletionService};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "completion";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Extract the assistant reply, falling back to an empty string when the
/// response carries no choice or no content.
fn reply_text(response: CompletionResponse) -> String {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content)
        .unwrap_or_default()
}

pub struct GroqCompletion {
    config: CompletionConfig,
    client: reqwest::Client,
}

impl GroqCompletion {
    pub fn new(config: CompletionConfig) -> ServiceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|source| ServiceError::Http { service: SERVICE, source })?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionService for GroqCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> ServiceResult<ChatMessage> {
        let request = CompletionRequest {
            model: &self.config.model,
            messages,
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|source| ServiceError::Http { service: SERVICE, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| ServiceError::Decode {
            service: SERVICE,
            message: e.to_string(),
        })?;

        let content = reply_text(parsed);
        debug!("Completion returned {} chars", content.len());
        Ok(ChatMessage::assistant(content))
    }
}
