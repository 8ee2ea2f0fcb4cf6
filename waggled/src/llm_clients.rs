//! Concrete LLM client construction: an OpenAI-compatible provider behind
//! the `LlmClient` trait, one instance for the main loop and one for the
//! compaction summarizer.

use std::sync::Arc;

use anyhow::Result;
use rig::client::CompletionClient;
use tracing::warn;

use waggle_agent::llm::{LlmClient, RigLlmClient};

use crate::config::ModelConfig;

pub fn build_main_client(config: &ModelConfig) -> Result<Arc<dyn LlmClient>> {
    build(config, &config.model)
}

pub fn build_summarizer_client(config: &ModelConfig) -> Result<Arc<dyn LlmClient>> {
    let model = config
        .summarizer_model
        .as_deref()
        .unwrap_or(&config.model);
    build(config, model)
}

fn build(config: &ModelConfig, model_name: &str) -> Result<Arc<dyn LlmClient>> {
    let api_key = std::env::var(&config.api_key_env).unwrap_or_else(|_| {
        warn!(
            env = %config.api_key_env,
            "API key environment variable not set; model calls will be rejected by the provider"
        );
        String::new()
    });

    let client = rig::providers::openai::Client::from_url(&api_key, &config.api_base);
    let model = client.completion_model(model_name);
    Ok(Arc::new(RigLlmClient::new(model)))
}
