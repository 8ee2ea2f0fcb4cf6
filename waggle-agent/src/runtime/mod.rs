//! `SessionRuntime`: the per-turn state machine that interleaves model
//! completions with tool execution, streams output chunks, mirrors everything
//! into the persisted event log, and honors cooperative cancellation.

mod helpers;

use std::sync::Arc;

use tokio::sync::mpsc;

use waggle_core::cancel::{guard, CancelChannel};
use waggle_core::chunk::OutputChunk;
use waggle_core::config::RuntimeLimits;
use waggle_core::error::{AgentError, SwarmError};
use waggle_core::session::{Event, Part, SessionKey, SessionStore};
use waggle_core::tool::{ToolContext, ToolSet};

use crate::compaction::Compactor;
use crate::convert::{events_to_rig_messages, specs_to_rig_definitions};
use crate::llm::{LlmClient, ModelPart};

use helpers::{derive_title, truncate_tool_result};

pub struct SessionRuntime {
    store: Arc<dyn SessionStore>,
    llm: Arc<dyn LlmClient>,
    compactor: Compactor,
    system_prompt: String,
    limits: RuntimeLimits,
}

impl SessionRuntime {
    pub fn new(
        store: Arc<dyn SessionStore>,
        llm: Arc<dyn LlmClient>,
        compactor: Compactor,
        system_prompt: String,
        limits: RuntimeLimits,
    ) -> Self {
        Self {
            store,
            llm,
            compactor,
            system_prompt,
            limits,
        }
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        self.store.clone()
    }

    /// Execute one user turn. Chunks stream through `chunks` until the model
    /// produces a final response or the turn is cancelled; cancellation and
    /// terminal errors both finalize with a last text chunk.
    pub async fn run_turn(
        &self,
        key: &SessionKey,
        user_message: &str,
        tools: &ToolSet,
        cancel: &CancelChannel,
        chunks: &mpsc::Sender<OutputChunk>,
    ) -> Result<(), SwarmError> {
        match self.run_turn_inner(key, user_message, tools, cancel, chunks).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => {
                tracing::info!(session = %key, "turn cancelled, finalizing");
                let notice = Event::system("[System] The user interrupted the current task.");
                if let Err(store_err) = self.store.append_event(key, notice).await {
                    tracing::warn!(session = %key, error = %store_err, "failed to record cancellation notice");
                }
                emit(chunks, OutputChunk::text("\n\n[Stopped] Task cancelled.")).await;
                Ok(())
            }
            Err(e) => {
                tracing::error!(session = %key, error = %e, "turn failed");
                emit(chunks, OutputChunk::text(format!("\n[ERROR] {e}"))).await;
                Err(e)
            }
        }
    }

    async fn run_turn_inner(
        &self,
        key: &SessionKey,
        user_message: &str,
        tools: &ToolSet,
        cancel: &CancelChannel,
        chunks: &mpsc::Sender<OutputChunk>,
    ) -> Result<(), SwarmError> {
        let session = self.store.get_or_create(key).await?;

        self.store
            .append_event(key, Event::user(user_message))
            .await?;

        if session.title.is_none() {
            self.store
                .set_title(key, &derive_title(user_message))
                .await?;
        }

        // Pre-flight compaction: predictive and structural tiers.
        if self.compactor.maybe_compact(self.store.as_ref(), key).await? {
            emit(
                chunks,
                OutputChunk::text(
                    "[System] Conversation history was compacted before this turn.\n",
                ),
            )
            .await;
        }

        let ctx = ToolContext {
            session: key.clone(),
            tools: tools.clone(),
            cancel: cancel.clone(),
            chunks: chunks.clone(),
        };

        let mut iteration: u32 = 0;
        let mut overflow_retried = false;

        loop {
            iteration += 1;
            if iteration > self.limits.max_iterations {
                return Err(AgentError::MaxIterationsExceeded {
                    session: key.clone(),
                    iterations: iteration,
                }
                .into());
            }

            guard(cancel, key)?;

            let session = self
                .store
                .get(key)
                .await?
                .ok_or_else(|| AgentError::SessionNotFound {
                    session: key.clone(),
                })?;
            let messages = events_to_rig_messages(&session.events);
            let tool_defs = specs_to_rig_definitions(&tools.specs());

            tracing::debug!(session = %key, iteration, "calling model");
            let response = match self
                .llm
                .complete(&self.system_prompt, messages, tool_defs)
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_context_overflow() && !overflow_retried => {
                    overflow_retried = true;
                    tracing::warn!(session = %key, "context window exceeded, compacting");
                    emit(
                        chunks,
                        OutputChunk::text(
                            "[System] Context window exceeded, compacting history...\n",
                        ),
                    )
                    .await;
                    // Compaction failure abandons recovery; the original
                    // overflow is what the caller sees.
                    if let Err(compact_err) =
                        self.compactor.force_compact(self.store.as_ref(), key).await
                    {
                        tracing::warn!(session = %key, error = %compact_err, "reactive compaction failed");
                        return Err(e);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let mut text_parts: Vec<Part> = Vec::new();
            let mut called_tool = false;

            for part in response.parts {
                guard(cancel, key)?;

                match part {
                    ModelPart::Text(text) => {
                        emit(chunks, OutputChunk::text(text.clone())).await;
                        text_parts.push(Part::Text { text });
                    }
                    ModelPart::Thought(text) => {
                        emit(chunks, OutputChunk::thought(text.clone())).await;
                        text_parts.push(Part::Thought { text });
                    }
                    ModelPart::ToolCall { tool_name, args } => {
                        called_tool = true;

                        // Flush accumulated text so event order matches
                        // emission order.
                        if !text_parts.is_empty() {
                            self.store
                                .append_event(key, Event::model(std::mem::take(&mut text_parts)))
                                .await?;
                        }

                        emit(
                            chunks,
                            OutputChunk::ToolCall {
                                tool_name: tool_name.clone(),
                                args: args.clone(),
                            },
                        )
                        .await;
                        self.store
                            .append_event(key, Event::function_call(&tool_name, args.clone()))
                            .await?;

                        guard(cancel, key)?;
                        let (result, clean) = self.invoke_tool(&tool_name, args, &ctx).await?;

                        emit(
                            chunks,
                            OutputChunk::ToolResult {
                                tool_name: tool_name.clone(),
                                content: result.clone(),
                                clean: Some(clean),
                            },
                        )
                        .await;
                        let stored =
                            truncate_tool_result(result, self.limits.tool_result_max_chars);
                        self.store
                            .append_event(key, Event::function_response(&tool_name, stored))
                            .await?;
                    }
                }
            }

            if !text_parts.is_empty() {
                self.store
                    .append_event(key, Event::model(text_parts))
                    .await?;
            }

            if !called_tool {
                tracing::info!(session = %key, iterations = iteration, "turn completed");
                return Ok(());
            }
        }
    }

    /// Execute one tool call. Failures are data, not control flow: they come
    /// back as a failed result payload so the model can react. Cancellation
    /// raised by a tool propagates.
    async fn invoke_tool(
        &self,
        tool_name: &str,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<(serde_json::Value, bool), SwarmError> {
        let Some(tool) = ctx.tools.get(tool_name) else {
            tracing::warn!(tool = %tool_name, "model called unbound tool");
            return Ok((
                serde_json::json!({
                    "error": format!(
                        "Tool '{tool_name}' is not loaded. Call skill_load with the skill that provides it first."
                    ),
                    "status": "failed",
                }),
                false,
            ));
        };

        match tool.invoke(args, ctx).await {
            Ok(result) => Ok((result, true)),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                tracing::warn!(tool = %tool_name, error = %e, "tool call failed");
                Ok((
                    serde_json::json!({
                        "error": format!("Tool execution failed: {e}"),
                        "status": "failed",
                    }),
                    false,
                ))
            }
        }
    }
}

async fn emit(chunks: &mpsc::Sender<OutputChunk>, chunk: OutputChunk) {
    let _ = chunks.send(chunk).await;
}
