use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{RelayError, Result};
use crate::llm::LanguageModel;
use crate::message::{Message, ToolResult};
use crate::tool::ToolRegistry;

/// Alternates between the model and the registered tools until the model answers.
///
/// The model decides which tools to call; the agent only executes the calls and
/// feeds results back. Every [`Agent::respond`] starts a fresh conversation.
pub struct Agent<M: LanguageModel> {
    system_prompt: Option<String>,
    model: Arc<M>,
    tools: ToolRegistry,
    max_steps: usize,
}

/// Final answer plus the full message exchange that produced it.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub answer: String,
    pub messages: Vec<Message>,
}

impl<M: LanguageModel> Agent<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self {
            system_prompt: None,
            model,
            tools: ToolRegistry::new(),
            max_steps: 6,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run a single exchange with the agent. Returns the final assistant reply.
    pub async fn respond(&self, user_input: impl Into<String>) -> Result<String> {
        self.run(user_input).await.map(|run| run.answer)
    }

    pub async fn run(&self, user_input: impl Into<String>) -> Result<AgentRun> {
        let mut messages = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.push(Message::user(user_input));
        let tools = self.tools.list_tools();

        for step in 0..self.max_steps {
            let completion = self.model.complete_chat(&messages, &tools).await?;
            debug!(step, tool_calls = completion.tool_calls.len(), "model replied");

            if completion.tool_calls.is_empty() {
                let answer = completion.content.unwrap_or_default();
                messages.push(Message::assistant(answer.clone()));
                return Ok(AgentRun { answer, messages });
            }

            let calls = completion.tool_calls;
            messages.push(Message::assistant_tool_calls(
                completion.content.unwrap_or_default(),
                calls.clone(),
            ));
            for call in calls {
                info!(tool = %call.name, arguments = %call.arguments, "calling tool");
                let result = self.tools.call(&call.name, call.arguments).await?;
                messages.push(Message::tool(ToolResult {
                    tool_call_id: call.id,
                    name: call.name,
                    output: result.as_text(),
                    is_error: result.is_error(),
                }));
            }
        }

        Err(RelayError::Protocol(
            "Agent reached the step limit without returning a response".into(),
        ))
    }
}
