use std::collections::HashMap;
use std::sync::Arc;

use waggle_core::tool::SessionTool;

/// Factory producing a skill's tool bindings. Tools are compiled into the
/// node; activation selects them at runtime by skill id.
pub type ToolFactory = Arc<dyn Fn() -> Vec<Arc<dyn SessionTool>> + Send + Sync>;

/// Maps skill ids to their tool factories. A skill with no entry here is
/// instruction-only: activating it adds the SOP to the conversation but no
/// tools.
#[derive(Clone, Default)]
pub struct ToolProviderRegistry {
    providers: HashMap<String, ToolFactory>,
}

impl ToolProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, skill_id: impl Into<String>, factory: F)
    where
        F: Fn() -> Vec<Arc<dyn SessionTool>> + Send + Sync + 'static,
    {
        self.providers.insert(skill_id.into(), Arc::new(factory));
    }

    pub fn tools_for(&self, skill_id: &str) -> Vec<Arc<dyn SessionTool>> {
        self.providers
            .get(skill_id)
            .map(|factory| factory())
            .unwrap_or_default()
    }

    pub fn has_provider(&self, skill_id: &str) -> bool {
        self.providers.contains_key(skill_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use waggle_core::error::SwarmError;
    use waggle_core::tool::{ToolContext, ToolSpec};

    struct StaticTool(&'static str);

    #[async_trait]
    impl SessionTool for StaticTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: self.0.to_string(),
                description: String::new(),
                parameters: serde_json::json!({"type": "object"}),
            }
        }

        async fn invoke(&self, _args: Value, _ctx: &ToolContext) -> Result<Value, SwarmError> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn registered_factory_produces_tools() {
        let mut registry = ToolProviderRegistry::new();
        registry.register("remote_worker_connector", || {
            vec![
                Arc::new(StaticTool("dispatch_task")) as Arc<dyn SessionTool>,
                Arc::new(StaticTool("dispatch_batch_tasks")),
            ]
        });

        assert!(registry.has_provider("remote_worker_connector"));
        let tools = registry.tools_for("remote_worker_connector");
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].spec().name, "dispatch_task");

        assert!(registry.tools_for("instruction-only").is_empty());
    }
}
