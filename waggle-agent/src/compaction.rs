//! Context compaction: summarize the event log through an auxiliary model
//! call and replace it, through the store's in-place primitive, with the
//! leading system events plus one summary event.
//!
//! Three tiers trigger it: a predictive token estimate, a structural event
//! count, and reactive recovery from a provider context-window rejection.

use std::sync::Arc;

use waggle_core::config::RuntimeLimits;
use waggle_core::error::{AgentError, SwarmError};
use waggle_core::session::{Author, Event, Part, SessionKey, SessionStore};

use crate::llm::LlmClient;

/// Instruction for the auxiliary summarizer call.
const SUMMARIZER_INSTRUCTION: &str = "You are a professional conversation summarizer. Read the \
conversation history and produce a compact summary. Rules: preserve the user's core goal; record \
the key completed steps and decisions; keep open questions; omit code blocks, long text output \
and repeated tool-call details; the summary must be self-contained so another agent can take over \
without reading the original history.";

/// Prefix of the synthesized summary event. The log after compaction is:
/// leading system events, then one user event starting with this marker.
pub const SUMMARY_EVENT_PREFIX: &str =
    "[System] Context cleared. Summary of previous conversation:\n";

/// Which tier asked for compaction; used for logging only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionTrigger {
    Predictive,
    Structural,
}

#[derive(Clone)]
pub struct Compactor {
    summarizer: Arc<dyn LlmClient>,
    limits: RuntimeLimits,
}

impl Compactor {
    pub fn new(summarizer: Arc<dyn LlmClient>, limits: RuntimeLimits) -> Self {
        Self { summarizer, limits }
    }

    /// Threshold check for the predictive and structural tiers. Logs below
    /// the event floor are never compacted, which also makes threshold-driven
    /// compaction idempotent: a freshly compacted log sits far below the
    /// floor.
    pub fn needs_compaction(&self, events: &[Event]) -> Option<CompactionTrigger> {
        if events.len() < self.limits.min_events {
            return None;
        }
        let estimate = RuntimeLimits::estimate_tokens(total_content_chars(events));
        if estimate > self.limits.predictive_threshold() {
            return Some(CompactionTrigger::Predictive);
        }
        if events.len() > self.limits.max_events {
            return Some(CompactionTrigger::Structural);
        }
        None
    }

    /// Pre-flight check-and-compact. Returns true when compaction ran.
    pub async fn maybe_compact(
        &self,
        store: &dyn SessionStore,
        key: &SessionKey,
    ) -> Result<bool, SwarmError> {
        let Some(session) = store.get(key).await? else {
            return Ok(false);
        };
        let Some(trigger) = self.needs_compaction(&session.events) else {
            return Ok(false);
        };
        tracing::info!(
            session = %key,
            trigger = ?trigger,
            event_count = session.events.len(),
            "compaction triggered"
        );
        self.run(store, key, session.events).await?;
        Ok(true)
    }

    /// Unconditional compaction: the reactive tier and the `smart_compact`
    /// tool land here.
    pub async fn force_compact(
        &self,
        store: &dyn SessionStore,
        key: &SessionKey,
    ) -> Result<(), SwarmError> {
        let session = store
            .get(key)
            .await?
            .ok_or_else(|| AgentError::SessionNotFound {
                session: key.clone(),
            })?;
        self.run(store, key, session.events).await
    }

    async fn run(
        &self,
        store: &dyn SessionStore,
        key: &SessionKey,
        events: Vec<Event>,
    ) -> Result<(), SwarmError> {
        let rendered = render_history(&events);
        let original_len = rendered.len();
        let input = truncate_head_tail(&rendered, self.limits.render_cap_chars);

        let summary = self.summarize(&input).await.map_err(|e| {
            tracing::warn!(session = %key, error = %e, "summarizer call failed, compaction abandoned");
            SwarmError::Agent(AgentError::CompactionFailed {
                reason: e.to_string(),
            })
        })?;

        let new_events = rebuild_events(&events, &summary);
        store.replace_events(key, new_events).await?;

        tracing::info!(
            session = %key,
            original_events = events.len(),
            original_chars = original_len,
            summary_chars = summary.len(),
            "compaction completed"
        );
        Ok(())
    }

    async fn summarize(&self, history: &str) -> Result<String, SwarmError> {
        let prompt = format!("Summarize the following conversation history:\n\n{history}");
        let response = self
            .summarizer
            .complete(
                SUMMARIZER_INSTRUCTION,
                vec![rig::completion::Message::user(prompt)],
                vec![],
            )
            .await?;
        let summary = response.text();
        if summary.trim().is_empty() {
            return Err(SwarmError::Llm(
                waggle_core::error::LlmError::InvalidResponse {
                    reason: "summarizer returned no text".into(),
                },
            ));
        }
        Ok(summary)
    }
}

/// Role-tagged text rendering of the event log, the summarizer's input.
pub(crate) fn render_history(events: &[Event]) -> String {
    let mut lines = Vec::with_capacity(events.len());
    for event in events {
        let mut content = String::new();
        for part in &event.content.parts {
            match part {
                Part::Text { text } | Part::Thought { text } => content.push_str(text),
                Part::FunctionCall { tool_name, .. } => {
                    content.push_str(&format!(" [ToolCall: {tool_name}]"));
                }
                Part::FunctionResponse { tool_name, result } => {
                    content.push_str(&format!(" [ToolOutput: {tool_name} -> {result}]"));
                }
            }
        }
        lines.push(format!("{}: {}", event.content.role, content));
    }
    lines.join("\n")
}

/// Total content size driving the predictive token estimate: text parts plus
/// serialized tool args and results (tool output is usually what blows the
/// context).
fn total_content_chars(events: &[Event]) -> usize {
    events
        .iter()
        .flat_map(|e| e.content.parts.iter())
        .map(|part| match part {
            Part::Text { text } | Part::Thought { text } => text.len(),
            Part::FunctionCall { args, .. } => args.to_string().len(),
            Part::FunctionResponse { result, .. } => result.to_string().len(),
        })
        .sum()
}

/// Guard the summarizer itself against context overflow: above `cap` chars,
/// keep the first 20% and the last 30% and drop the middle.
pub(crate) fn truncate_head_tail(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let head_target = cap / 5;
    let tail_target = cap * 3 / 10;

    let head_end = floor_char_boundary(text, head_target);
    let tail_start = ceil_char_boundary(text, text.len() - tail_target);
    let omitted = tail_start - head_end;

    format!(
        "{}\n...[{} chars of history omitted]...\n{}",
        &text[..head_end],
        omitted,
        &text[tail_start..]
    )
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Build the post-compaction event list: leading system events, the summary
/// event, and — when a function_call was pending at compaction time — the
/// call carried over plus a synthetic function_response so the model never
/// sees a dangling call.
fn rebuild_events(original: &[Event], summary: &str) -> Vec<Event> {
    let mut new_events: Vec<Event> = original
        .iter()
        .take_while(|e| e.author == Author::System)
        .cloned()
        .collect();

    new_events.push(Event::user(format!("{SUMMARY_EVENT_PREFIX}{summary}")));

    let pending = pending_function_calls(original);
    if !pending.is_empty() {
        let call_parts: Vec<Part> = pending
            .iter()
            .map(|(tool_name, args)| Part::FunctionCall {
                tool_name: tool_name.clone(),
                args: args.clone(),
            })
            .collect();
        new_events.push(Event::model(call_parts));
        for (tool_name, _) in &pending {
            new_events.push(Event::function_response(
                tool_name.clone(),
                serde_json::json!({
                    "status": "interrupted",
                    "note": "tool call superseded by context compaction",
                }),
            ));
        }
    }

    new_events
}

/// Function calls with no matching response yet, in order. Calls and
/// responses correlate by tool name.
fn pending_function_calls(events: &[Event]) -> Vec<(String, serde_json::Value)> {
    let mut pending: Vec<(String, serde_json::Value)> = Vec::new();
    for event in events {
        for part in &event.content.parts {
            match part {
                Part::FunctionCall { tool_name, args } => {
                    pending.push((tool_name.clone(), args.clone()));
                }
                Part::FunctionResponse { tool_name, .. } => {
                    if let Some(pos) = pending.iter().position(|(name, _)| name == tool_name) {
                        pending.remove(pos);
                    }
                }
                _ => {}
            }
        }
    }
    pending
}
