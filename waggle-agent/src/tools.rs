//! Session-scoped meta-tools: `skill_load`, the dynamic gateway every
//! session starts with, and `smart_compact`, the forced-compaction tool the
//! compactor skill mounts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use waggle_core::error::{SwarmError, ToolError};
use waggle_core::session::SessionStore;
use waggle_core::tool::{SessionTool, ToolContext, ToolSpec};
use waggle_skills::{SkillManager, ToolProviderRegistry, COMPACTOR_SKILL_ID};

use crate::compaction::Compactor;

/// The dynamic gateway: validates a skill id, returns its full instructions,
/// and mounts the skill's tools into the calling session. This is the only
/// tool a session starts with.
pub struct SkillLoadTool {
    manager: Arc<Mutex<SkillManager>>,
    providers: Arc<ToolProviderRegistry>,
    compactor: Compactor,
    store: Arc<dyn SessionStore>,
}

impl SkillLoadTool {
    pub fn new(
        manager: Arc<Mutex<SkillManager>>,
        providers: Arc<ToolProviderRegistry>,
        compactor: Compactor,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            manager,
            providers,
            compactor,
            store,
        }
    }
}

#[async_trait]
impl SessionTool for SkillLoadTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "skill_load".into(),
            description: "Load a skill by id. Returns the skill's full instructions and mounts \
                          its tools into this session. Call this before using any capability \
                          that is not already available."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "skill_id": {
                        "type": "string",
                        "description": "Identifier of the skill to activate, e.g. \"web-search\"",
                    }
                },
                "required": ["skill_id"],
            }),
        }
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<Value, SwarmError> {
        let skill_id = args
            .get("skill_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments {
                tool_name: "skill_load".into(),
                message: "missing required string argument 'skill_id'".into(),
            })?
            .to_string();

        tracing::info!(session = %ctx.session, skill = %skill_id, "activating skill");

        let mut manager = self.manager.lock().await;
        if !manager.exists(&skill_id) {
            let available = manager.list_ids();
            return Ok(Value::String(format!(
                "[ERROR] Skill '{skill_id}' does not exist. Available skills: {available:?}"
            )));
        }

        // The compactor is special: activating it runs the compaction engine
        // directly, and mounts smart_compact for later forced runs.
        if skill_id == COMPACTOR_SKILL_ID {
            self.compactor
                .force_compact(self.store.as_ref(), &ctx.session)
                .await?;
            let added = ctx.tools.extend_dedup(self.providers.tools_for(&skill_id));
            return Ok(Value::String(format!(
                "[OK] Conversation history has been compacted into a summary. \
                 Mounted tools: {added:?}. Call smart_compact whenever the context \
                 grows too large again."
            )));
        }

        let instructions = match manager.load_instructions(&skill_id).await {
            Ok(body) => body,
            Err(e) => {
                return Ok(Value::String(format!(
                    "[ERROR] Failed to load skill '{skill_id}': {e}"
                )))
            }
        };

        let added = ctx.tools.extend_dedup(self.providers.tools_for(&skill_id));
        tracing::info!(session = %ctx.session, skill = %skill_id, tools = ?added, "skill activated");

        Ok(Value::String(format!(
            "[OK] Skill '{skill_id}' loaded. Mounted tools: {added:?}\n\n\
             Instructions:\n\n{instructions}\n\n---\n\
             Follow the instructions above exactly. Check each tool's description before use."
        )))
    }
}

/// Forced compaction, independent of the thresholds.
pub struct SmartCompactTool {
    compactor: Compactor,
    store: Arc<dyn SessionStore>,
}

impl SmartCompactTool {
    pub fn new(compactor: Compactor, store: Arc<dyn SessionStore>) -> Self {
        Self { compactor, store }
    }
}

#[async_trait]
impl SessionTool for SmartCompactTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "smart_compact".into(),
            description: "Summarize the conversation history and replace it with the summary, \
                          freeing context space. Use after finishing a large task or when the \
                          conversation grows long."
                .into(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn invoke(&self, _args: Value, ctx: &ToolContext) -> Result<Value, SwarmError> {
        self.compactor
            .force_compact(self.store.as_ref(), &ctx.session)
            .await?;
        Ok(Value::String(
            "[OK] Context compacted. The conversation history has been replaced with a summary."
                .into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::SUMMARY_EVENT_PREFIX;
    use crate::llm::{MockLlmClient, ModelResponse};
    use crate::testutil::MemoryStore;
    use tokio::sync::mpsc;
    use waggle_core::cancel::CancelChannel;
    use waggle_core::config::RuntimeLimits;
    use waggle_core::session::{Event, SessionKey};
    use waggle_core::tool::ToolSet;

    fn write_skill(root: &std::path::Path, id: &str, body: &str) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("SKILL.md"),
            format!("---\nname: \"{id}\"\ndescription: \"{id} skill\"\n---\n{body}\n"),
        )
        .unwrap();
    }

    struct NoopTool(&'static str);

    #[async_trait]
    impl SessionTool for NoopTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.0.into(),
                description: String::new(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, SwarmError> {
            Ok(Value::Null)
        }
    }

    async fn setup(
        skills: &[(&'static str, &'static str)],
        summarizer: Arc<MockLlmClient>,
    ) -> (SkillLoadTool, Arc<MemoryStore>, ToolContext) {
        let tmp = tempfile::tempdir().unwrap();
        for (id, body) in skills {
            write_skill(tmp.path(), id, body);
        }
        let mut manager = SkillManager::new(tmp.path());
        manager.scan().await.unwrap();
        // The tempdir must outlive the scan only; instructions load lazily,
        // so leak it for the test's lifetime.
        std::mem::forget(tmp);

        let mut providers = ToolProviderRegistry::new();
        providers.register("web-search", || {
            vec![Arc::new(NoopTool("web_search")) as Arc<dyn SessionTool>]
        });
        providers.register(COMPACTOR_SKILL_ID, || {
            vec![Arc::new(NoopTool("smart_compact")) as Arc<dyn SessionTool>]
        });

        let store = Arc::new(MemoryStore::new());
        let limits = RuntimeLimits::default();
        let compactor = Compactor::new(summarizer, limits);
        let tool = SkillLoadTool::new(
            Arc::new(Mutex::new(manager)),
            Arc::new(providers),
            compactor,
            store.clone(),
        );

        let key = SessionKey::new("app", "user", "s1");
        store.seed(&key, vec![Event::user("hi")]).await;
        let (tx, _rx) = mpsc::channel(8);
        let ctx = ToolContext {
            session: key,
            tools: ToolSet::new(vec![]),
            cancel: CancelChannel::new(),
            chunks: tx,
        };
        (tool, store, ctx)
    }

    #[tokio::test]
    async fn loading_a_skill_returns_sop_and_mounts_tools() {
        let (tool, _store, ctx) = setup(
            &[("web-search", "1. Build query\n2. Search")],
            Arc::new(MockLlmClient::new(vec![])),
        )
        .await;

        let result = tool
            .invoke(json!({"skill_id": "web-search"}), &ctx)
            .await
            .unwrap();
        let text = result.as_str().unwrap();
        assert!(text.starts_with("[OK] Skill 'web-search' loaded"));
        assert!(text.contains("Build query"));
        assert_eq!(ctx.tools.names(), vec!["web_search"]);

        // Loading again is a no-op on the tool set.
        tool.invoke(json!({"skill_id": "web-search"}), &ctx)
            .await
            .unwrap();
        assert_eq!(ctx.tools.len(), 1);
    }

    #[tokio::test]
    async fn unknown_skill_is_reported_as_tool_result() {
        let (tool, _store, ctx) = setup(
            &[("web-search", "body")],
            Arc::new(MockLlmClient::new(vec![])),
        )
        .await;

        let result = tool
            .invoke(json!({"skill_id": "ghost"}), &ctx)
            .await
            .unwrap();
        let text = result.as_str().unwrap();
        assert!(text.starts_with("[ERROR]"));
        assert!(text.contains("web-search"));
        assert!(ctx.tools.is_empty());
    }

    #[tokio::test]
    async fn missing_argument_is_an_error() {
        let (tool, _store, ctx) = setup(&[], Arc::new(MockLlmClient::new(vec![]))).await;
        let err = tool.invoke(json!({}), &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            SwarmError::Tool(ToolError::InvalidArguments { .. })
        ));
    }

    #[tokio::test]
    async fn compactor_activation_runs_compaction_and_mounts_smart_compact() {
        let summarizer = Arc::new(MockLlmClient::new(vec![ModelResponse::text_only(
            "everything so far",
        )]));
        let (tool, store, ctx) = setup(&[("compactor", "Reset the context.")], summarizer).await;

        let result = tool
            .invoke(json!({"skill_id": "compactor"}), &ctx)
            .await
            .unwrap();
        assert!(result.as_str().unwrap().starts_with("[OK]"));
        assert_eq!(ctx.tools.names(), vec!["smart_compact"]);

        let events = store.events(&ctx.session).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].text().starts_with(SUMMARY_EVENT_PREFIX));
    }

    #[tokio::test]
    async fn skill_activation_expands_the_tool_set_mid_turn() {
        use crate::runtime::SessionRuntime;
        use waggle_core::chunk::OutputChunk;

        let (skill_load, store, _ctx) = setup(
            &[("web-search", "Use web_search and cite sources.")],
            Arc::new(MockLlmClient::new(vec![])),
        )
        .await;

        // The model loads the skill, then calls the freshly mounted tool,
        // then answers.
        let llm = Arc::new(MockLlmClient::new(vec![
            ModelResponse::tool_call("skill_load", json!({"skill_id": "web-search"})),
            ModelResponse::tool_call("web_search", json!({"query": "rust news"})),
            ModelResponse::text_only("Rust 1.80 was released."),
        ]));
        let limits = RuntimeLimits::default();
        let runtime = SessionRuntime::new(
            store.clone(),
            llm,
            Compactor::new(Arc::new(MockLlmClient::new(vec![])), limits),
            "test agent".into(),
            limits,
        );

        let key = SessionKey::new("app", "user", "s2");
        let tools = ToolSet::new(vec![Arc::new(skill_load)]);
        let (tx, mut rx) = mpsc::channel(256);
        runtime
            .run_turn(&key, "search the web for rust news", &tools, &CancelChannel::new(), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(tools.names(), vec!["skill_load", "web_search"]);

        let mut tool_calls = Vec::new();
        let mut final_text = String::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                OutputChunk::ToolCall { tool_name, .. } => tool_calls.push(tool_name),
                OutputChunk::Text { content } => final_text.push_str(&content),
                _ => {}
            }
        }
        assert_eq!(tool_calls, vec!["skill_load", "web_search"]);
        assert!(final_text.contains("Rust 1.80"));
    }

    #[tokio::test]
    async fn smart_compact_forces_compaction() {
        let store = Arc::new(MemoryStore::new());
        let key = SessionKey::new("app", "user", "s1");
        store
            .seed(&key, vec![Event::user("q"), Event::model_text("a")])
            .await;

        let compactor = Compactor::new(
            Arc::new(MockLlmClient::new(vec![ModelResponse::text_only("short")])),
            RuntimeLimits::default(),
        );
        let tool = SmartCompactTool::new(compactor, store.clone());
        let (tx, _rx) = mpsc::channel(8);
        let ctx = ToolContext {
            session: key.clone(),
            tools: ToolSet::new(vec![]),
            cancel: CancelChannel::new(),
            chunks: tx,
        };

        let result = tool.invoke(json!({}), &ctx).await.unwrap();
        assert!(result.as_str().unwrap().contains("[OK]"));

        let events = store.events(&key).await;
        assert_eq!(events.len(), 1);
        assert!(events[0].text().starts_with(SUMMARY_EVENT_PREFIX));
    }
}
