//! OpenAI-compatible chat completions client.

use super::{ChatMessage, LanguageModel, LlmError};
use log::{info, warn};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct CompletionReply {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    content: Option<String>,
}

/// Blocking client for `POST {api_base}/chat/completions`.
pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiChatClient {
    pub fn new(
        api_base: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() || api_base.trim().is_empty() {
            return Err(LlmError::NotConfigured);
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| LlmError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key,
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl LanguageModel for OpenAiChatClient {
    fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let started_at = Instant::now();
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
            })
            .send()
            .map_err(|err| LlmError::Unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                "event=llm_complete module=llm status=error http_status={} duration_ms={}",
                status.as_u16(),
                started_at.elapsed().as_millis()
            );
            return Err(LlmError::Unavailable(format!("HTTP {status}")));
        }

        let reply: CompletionReply = response
            .json()
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
        let text = reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::InvalidResponse("reply has no choices".to_string()))?;

        info!(
            "event=llm_complete module=llm status=ok messages={} duration_ms={}",
            messages.len(),
            started_at.elapsed().as_millis()
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::{CompletionReply, CompletionRequest, OpenAiChatClient};
    use crate::llm::{ChatMessage, LlmError};
    use std::time::Duration;

    #[test]
    fn request_serializes_roles_in_lowercase() {
        let messages = [ChatMessage::system("be brief"), ChatMessage::user("hi")];
        let body = serde_json::to_value(CompletionRequest {
            model: "gpt-3.5-turbo",
            messages: &messages,
        })
        .unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn reply_parses_first_choice() {
        let reply: CompletionReply = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"hello"}}]}"#,
        )
        .unwrap();
        assert_eq!(reply.choices[0].message.content.as_deref(), Some("hello"));
    }

    #[test]
    fn missing_key_is_not_configured() {
        let result = OpenAiChatClient::new(
            "https://api.openai.com/v1",
            "  ",
            "gpt-3.5-turbo",
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(LlmError::NotConfigured)));
    }
}
