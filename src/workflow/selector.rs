//! Next-step selection
//!
//! A selector only proposes. The engine's guard decides what actually runs,
//! so an LLM selector that stops early or loops cannot break the ordering.

use super::definition::WorkflowDefinition;
use crate::error::OrchestrationError;
use crate::llm::{generate_with_retry, LlmClient};
use crate::models::Task;
use crate::retry::RetryPolicies;
use crate::tools::ToolRegistry;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    Call { tool: String, input: Value },
    Finish(String),
}

/// What a selector sees of the run in progress.
pub struct SelectionView<'a> {
    pub task: &'a Task,
    pub definition: &'a WorkflowDefinition,
    pub completed: &'a HashSet<String>,
    pub tools: &'a ToolRegistry,
    /// One line per step taken so far.
    pub history: &'a [String],
}

#[async_trait]
pub trait StepSelector: Send + Sync {
    fn name(&self) -> &'static str;
    async fn propose(&self, view: &SelectionView<'_>) -> Result<Proposal>;
}

/// Always proposes the first ready step.
pub struct DeterministicSelector;

#[async_trait]
impl StepSelector for DeterministicSelector {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn propose(&self, view: &SelectionView<'_>) -> Result<Proposal> {
        Ok(match view.definition.ready_steps(view.completed).first() {
            Some(step) => Proposal::Call {
                tool: step.name.clone(),
                input: Value::Null,
            },
            None => Proposal::Finish("All steps completed.".to_string()),
        })
    }
}

const SELECTOR_SYSTEM_PROMPT: &str =
    "You are a finance automation agent. Pick the next tool to call. Reply in the ReAct format only.";

/// ReAct-style selector: the LLM answers with `Action:` / `Action Input:` or
/// `Final Answer:`.
pub struct LlmStepSelector {
    llm: Arc<dyn LlmClient>,
    policies: RetryPolicies,
}

impl LlmStepSelector {
    pub fn new(llm: Arc<dyn LlmClient>, policies: RetryPolicies) -> Self {
        Self { llm, policies }
    }

    fn prompt(view: &SelectionView<'_>) -> String {
        let mut prompt = format!(
            "You are the {} agent.\nTask: {}\n\nYou have access to the following tools:\n",
            view.definition.agent, view.task.description
        );
        for step in &view.definition.steps {
            let description = view
                .tools
                .get(&step.name)
                .map(|t| t.description())
                .unwrap_or("");
            prompt.push_str(&format!("- {}: {}\n", step.name, description));
        }

        prompt.push_str("\nPrevious steps:\n");
        if view.history.is_empty() {
            prompt.push_str("(none)\n");
        }
        for line in view.history {
            prompt.push_str(line);
            prompt.push('\n');
        }

        prompt.push_str(
            "\nUse the following format:\n\
             Thought: you should always think about what to do\n\
             Action: the tool to call\n\
             Action Input: JSON parameters for the tool, or nothing\n\
             ...or, when every step is done:\n\
             Final Answer: a short summary of the work\n",
        );
        prompt
    }
}

#[async_trait]
impl StepSelector for LlmStepSelector {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn propose(&self, view: &SelectionView<'_>) -> Result<Proposal> {
        let reply = generate_with_retry(
            self.llm.as_ref(),
            &self.policies,
            SELECTOR_SYSTEM_PROMPT,
            &Self::prompt(view),
        )
        .await
        .into_result()?;

        parse_react_reply(&reply)
    }
}

fn field<'r>(reply: &'r str, label: &str) -> Option<&'r str> {
    reply.lines().find_map(|line| {
        let line = line.trim();
        line.strip_prefix(label).map(str::trim)
    })
}

/// Parse a ReAct reply. An `Action:` wins over a `Final Answer:`.
pub fn parse_react_reply(reply: &str) -> Result<Proposal> {
    if let Some(action) = field(reply, "Action:") {
        let tool = action.trim_matches(|c| c == '`' || c == '"' || c == '\'').to_string();
        if tool.is_empty() {
            return Err(unparseable(reply));
        }

        let input = match field(reply, "Action Input:") {
            None | Some("") | Some("None") | Some("none") => Value::Null,
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        };
        return Ok(Proposal::Call { tool, input });
    }

    if let Some(start) = reply.find("Final Answer:") {
        let answer = reply[start + "Final Answer:".len()..].trim();
        return Ok(Proposal::Finish(answer.to_string()));
    }

    Err(unparseable(reply))
}

fn unparseable(reply: &str) -> OrchestrationError {
    let preview: String = reply.chars().take(80).collect();
    OrchestrationError::LlmError {
        message: format!("could not parse selector reply: {}", preview),
        retryable: false,
    }
}
