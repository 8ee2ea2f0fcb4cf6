//! LLM client abstraction. Decouples the session runtime from any specific
//! provider; production nodes use a rig completion model behind this trait,
//! tests use the scripted mock.

use async_trait::async_trait;
use serde_json::Value;

use waggle_core::error::{LlmError, SwarmError};

/// One part of a model turn, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelPart {
    Text(String),
    Thought(String),
    ToolCall { tool_name: String, args: Value },
}

/// A completion response the runtime works with. Parts preserve the order
/// the model emitted them in; the loop replays them one at a time.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub parts: Vec<ModelPart>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ModelResponse {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            parts: vec![ModelPart::Text(text.into())],
            ..Default::default()
        }
    }

    pub fn tool_call(tool_name: impl Into<String>, args: Value) -> Self {
        Self {
            parts: vec![ModelPart::ToolCall {
                tool_name: tool_name.into(),
                args,
            }],
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ModelPart::ToolCall { .. }))
    }

    /// Concatenated text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ModelPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Abstraction over LLM completion used by both the session runtime and the
/// compaction summarizer.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Perform a completion call.
    ///
    /// `system_prompt` - the system instruction text.
    /// `messages` - chat history in rig Message format.
    /// `tool_definitions` - tools available for this call.
    async fn complete(
        &self,
        system_prompt: &str,
        messages: Vec<rig::completion::Message>,
        tool_definitions: Vec<rig::completion::ToolDefinition>,
    ) -> Result<ModelResponse, SwarmError>;
}

/// An LlmClient implementation that wraps a rig CompletionModel.
pub struct RigLlmClient<M: rig::completion::CompletionModel> {
    model: M,
}

impl<M: rig::completion::CompletionModel> RigLlmClient<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }
}

#[async_trait]
impl<M> LlmClient for RigLlmClient<M>
where
    M: rig::completion::CompletionModel + Send + Sync + 'static,
    M::Response: Send + Sync,
{
    async fn complete(
        &self,
        _system_prompt: &str,
        messages: Vec<rig::completion::Message>,
        tool_definitions: Vec<rig::completion::ToolDefinition>,
    ) -> Result<ModelResponse, SwarmError> {
        let (current_prompt, chat_history) = split_prompt_and_history(messages);

        let request = self
            .model
            .completion_request(current_prompt)
            .messages(chat_history)
            .tools(tool_definitions)
            .build();

        let response = self
            .model
            .completion(request)
            .await
            .map_err(|e| classify_completion_error(&e.to_string()))?;

        let mut parts = Vec::new();
        for content in response.choice.iter() {
            match content {
                rig::message::AssistantContent::Text(t) => {
                    parts.push(ModelPart::Text(t.text.clone()));
                }
                rig::message::AssistantContent::ToolCall(tc) => {
                    parts.push(ModelPart::ToolCall {
                        tool_name: tc.function.name.clone(),
                        args: tc.function.arguments.clone(),
                    });
                }
                _ => {} // Reasoning, Image, etc.
            }
        }

        Ok(ModelResponse {
            parts,
            // Token counts are not exposed by rig's CompletionResponse.
            prompt_tokens: 0,
            completion_tokens: 0,
        })
    }
}

/// Map a provider error message onto our error kinds. Context-size rejections
/// get their own kind because the runtime reacts to them with compaction.
fn classify_completion_error(message: &str) -> SwarmError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("context window")
        || lower.contains("context length")
        || lower.contains("maximum context")
        || lower.contains("context_length_exceeded")
    {
        return LlmError::ContextWindowExceeded {
            reason: message.to_string(),
        }
        .into();
    }
    LlmError::InvalidResponse {
        reason: message.to_string(),
    }
    .into()
}

fn split_prompt_and_history(
    messages: Vec<rig::completion::Message>,
) -> (String, Vec<rig::completion::Message>) {
    let Some(last) = messages.last() else {
        return (String::new(), vec![]);
    };

    if let Some(text) = extract_user_text(last) {
        let history = if messages.len() > 1 {
            messages[..messages.len() - 1].to_vec()
        } else {
            vec![]
        };
        return (text, history);
    }

    (String::new(), messages)
}

fn extract_user_text(message: &rig::completion::Message) -> Option<String> {
    match message {
        rig::completion::Message::User { content } => content.iter().find_map(|c| {
            if let rig::message::UserContent::Text(t) = c {
                Some(t.text.clone())
            } else {
                None
            }
        }),
        _ => None,
    }
}

/// Scripted mock for tests: replays responses (or errors) in order, then
/// falls back to an empty final answer.
pub struct MockLlmClient {
    items: std::sync::Mutex<Vec<Result<ModelResponse, SwarmError>>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            items: std::sync::Mutex::new(responses.into_iter().map(Ok).collect()),
        }
    }

    /// Mixed script of responses and errors, for failure-path tests.
    pub fn sequence(items: Vec<Result<ModelResponse, SwarmError>>) -> Self {
        Self {
            items: std::sync::Mutex::new(items),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(
        &self,
        _system_prompt: &str,
        _messages: Vec<rig::completion::Message>,
        _tool_definitions: Vec<rig::completion::ToolDefinition>,
    ) -> Result<ModelResponse, SwarmError> {
        let mut items = self.items.lock().expect("mock lock");
        if items.is_empty() {
            Ok(ModelResponse::text_only("No more scripted responses"))
        } else {
            items.remove(0)
        }
    }
}
