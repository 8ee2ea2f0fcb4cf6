//! Skill packages: one directory per skill holding a `SKILL.md` manifest
//! (YAML front-matter + markdown instruction body) and, for skills that ship
//! tools, a compiled-in tool provider registered under the skill's id.
//!
//! Loading is two-phase. Discovery parses only `{id, name, description}` so
//! the system prompt stays small; activation (`skill_load`) reads the full
//! instruction body and mounts the provider's tools into the session.

mod manager;
mod metadata;
mod provider;

pub use manager::{SkillManager, SkillManifest};
pub use metadata::{parse_skill_file, SkillMetadata};
pub use provider::ToolProviderRegistry;

/// Canonical id of the compaction skill. Activating it runs the compaction
/// engine directly instead of only mounting tools.
pub const COMPACTOR_SKILL_ID: &str = "compactor";

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("skill not found: {0}")]
    NotFound(String),

    #[error("failed to read skill: {0}")]
    ReadError(String),

    #[error("failed to parse skill manifest: {0}")]
    ParseError(String),

    #[error("skill manifest missing field: {0}")]
    MissingField(String),
}
