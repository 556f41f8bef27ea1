//! LLM clients
//!
//! The agents only use the LLM for free text: routing labels, chart insights,
//! report prose and approval suggestions. Nothing numeric flows through it.

pub mod gemini;
pub mod groq;

pub use gemini::GeminiClient;
pub use groq::GroqClient;

use crate::config::{LlmProvider, Settings};
use crate::error::OrchestrationError;
use crate::retry::{retry_classified, RetryOutcome, RetryPolicies};
use crate::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Complete a prompt with the LLM retry policy applied.
pub async fn generate_with_retry(
    llm: &dyn LlmClient,
    policies: &RetryPolicies,
    system: &str,
    prompt: &str,
) -> RetryOutcome<String> {
    retry_classified(policies, || llm.complete(system, prompt)).await
}

/// Build the configured provider, or `None` when no usable key is present.
pub fn build_llm_client(settings: &Settings) -> Result<Option<Arc<dyn LlmClient>>> {
    let client: Option<Arc<dyn LlmClient>> = match settings.llm_provider {
        LlmProvider::Gemini => match &settings.gemini_api_key {
            Some(key) => Some(Arc::new(GeminiClient::new(key.clone())?)),
            None => {
                warn!("LLM_PROVIDER=gemini but GEMINI_API_KEY is not set; LLM disabled");
                None
            }
        },
        LlmProvider::Groq => match &settings.groq_api_key {
            Some(key) => Some(Arc::new(GroqClient::new(
                key.clone(),
                settings.groq_model.clone(),
            )?)),
            None => {
                warn!("LLM_PROVIDER=groq but GROQ_API_KEY is not set; LLM disabled");
                None
            }
        },
        LlmProvider::None => None,
    };
    Ok(client)
}

/// Always fails without retry. Stands in when no provider is configured.
pub struct DisabledLlm;

#[async_trait::async_trait]
impl LlmClient for DisabledLlm {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String> {
        Err(OrchestrationError::LlmError {
            message: "no LLM provider configured".to_string(),
            retryable: false,
        })
    }
}

/// Deterministic LLM double: the first rule whose needle occurs in the
/// prompt wins, otherwise the default reply is returned.
pub struct ScriptedLlm {
    rules: Vec<(String, String)>,
    default_reply: String,
    failures_left: AtomicU32,
    retryable_failures: bool,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: default_reply.into(),
            failures_left: AtomicU32::new(0),
            retryable_failures: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    /// The next `n` calls fail with a transient error.
    pub fn failing(self, n: u32) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Every call fails with a non-retryable error.
    pub fn always_failing() -> Self {
        let mut llm = Self::new("").failing(u32::MAX);
        llm.retryable_failures = false;
        llm
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn complete(&self, _system: &str, prompt: &str) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(prompt.to_string());
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(OrchestrationError::LlmError {
                message: "scripted failure".to_string(),
                retryable: self.retryable_failures,
            });
        }

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.default_reply.clone());
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_rules_and_default() {
        let llm = ScriptedLlm::new("fallback").reply_when("Chart Type", "Costs are stable.");

        assert_eq!(
            llm.complete("", "Chart Type: Income Statement").await.unwrap(),
            "Costs are stable."
        );
        assert_eq!(llm.complete("", "other").await.unwrap(), "fallback");
        assert_eq!(llm.prompts().len(), 2);
    }

    #[tokio::test]
    async fn test_generate_with_retry_recovers_from_transient_failures() {
        let llm = ScriptedLlm::new("ok").failing(2);
        let outcome = generate_with_retry(&llm, &RetryPolicies::immediate(), "", "hi").await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_generate_with_retry_gives_up_after_three_attempts() {
        let llm = ScriptedLlm::new("ok").failing(5);
        let outcome = generate_with_retry(&llm, &RetryPolicies::immediate(), "", "hi").await;

        assert_eq!(outcome.attempts, 3);
        assert!(matches!(
            outcome.result,
            Err(OrchestrationError::RetriesExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_disabled_llm_is_not_retried() {
        let outcome = generate_with_retry(&DisabledLlm, &RetryPolicies::immediate(), "", "hi").await;
        assert_eq!(outcome.attempts, 1);
        tokio_test::assert_err!(outcome.result);
    }

    #[test]
    fn test_no_provider_builds_nothing() {
        let settings = Settings::default();
        assert!(build_llm_client(&settings).unwrap().is_none());
    }
}
