//! Groq chat completions client (OpenAI-compatible API)

use super::LlmClient;
use crate::error::{is_transient_status, OrchestrationError};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

const GROQ_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

pub struct GroqClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GroqClient {
    pub fn new(api_key: String, model: String) -> crate::Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: GROQ_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmClient for GroqClient {
    fn name(&self) -> &'static str {
        "groq"
    }

    async fn complete(&self, system: &str, prompt: &str) -> crate::Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        debug!(model = %self.model, "Calling Groq chat completions");

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestrationError::LlmError {
                message: format!("Groq request failed: {}", e),
                retryable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, "Groq API error response: {}", body);
            return Err(OrchestrationError::LlmError {
                message: format!("Groq API returned {}: {}", status, body),
                retryable: is_transient_status(status),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| OrchestrationError::LlmError {
            message: format!("Groq parse error: {}", e),
            retryable: false,
        })?;

        first_choice(parsed)
    }
}

fn first_choice(response: ChatResponse) -> crate::Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or_else(|| OrchestrationError::LlmError {
            message: "Groq returned no choices".to_string(),
            retryable: true,
        })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "llama3-70b-8192",
            temperature: 0.0,
            messages: vec![ChatMessage {
                role: "user",
                content: "route this",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "llama3-70b-8192");
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_first_choice() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"AGENT: PAYROLL"}}]}"#,
        )
        .unwrap();
        assert_eq!(first_choice(parsed).unwrap(), "AGENT: PAYROLL");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(first_choice(empty).is_err());
    }
}
