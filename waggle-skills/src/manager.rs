use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::metadata::{parse_skill_file, SkillMetadata};
use crate::SkillError;

/// Discovery-phase view of a skill: just enough for the model to route.
#[derive(Debug, Clone, Serialize)]
pub struct SkillManifest {
    pub id: String,
    pub name: String,
    pub description: String,
}

struct LoadedSkill {
    metadata: SkillMetadata,
    path: PathBuf,
    /// Instruction body; `None` until phase-2 activation loads it.
    instructions: Option<String>,
}

/// Scans a skills directory (one subdirectory per skill, each containing
/// `SKILL.md`) and serves the two loading phases.
pub struct SkillManager {
    skills: HashMap<String, LoadedSkill>,
    skills_dir: PathBuf,
}

impl SkillManager {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills: HashMap::new(),
            skills_dir: skills_dir.into(),
        }
    }

    /// Phase 1: scan the directory and cache front-matter only. Invalid
    /// skills (no front-matter, no name) are skipped with a warning.
    pub async fn scan(&mut self) -> Result<usize, SkillError> {
        self.skills.clear();
        let dir = self.skills_dir.clone();
        if !dir.exists() {
            warn!(dir = %dir.display(), "skills directory does not exist, skipping scan");
            return Ok(0);
        }

        let mut entries = tokio::fs::read_dir(&dir).await.map_err(io_read_err)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_read_err)? {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let skill_file = path.join("SKILL.md");
            if !skill_file.exists() {
                continue;
            }
            let id = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            match self.load_metadata(&skill_file, &path).await {
                Ok(skill) => {
                    info!(skill = %id, name = %skill.metadata.name, "discovered skill");
                    self.skills.insert(id, skill);
                }
                Err(e) => {
                    warn!(path = %skill_file.display(), error = %e, "skipping invalid skill");
                }
            }
        }

        info!(skill_count = self.skills.len(), "skill scan complete");
        Ok(self.skills.len())
    }

    async fn load_metadata(
        &self,
        skill_file: &Path,
        skill_dir: &Path,
    ) -> Result<LoadedSkill, SkillError> {
        let content = tokio::fs::read_to_string(skill_file)
            .await
            .map_err(|e| SkillError::ReadError(format!("{}: {e}", skill_file.display())))?;
        let (metadata, _body) = parse_skill_file(&content)?;
        Ok(LoadedSkill {
            metadata,
            path: skill_dir.to_path_buf(),
            instructions: None,
        })
    }

    /// Phase 2: read and cache the full instruction body for one skill.
    pub async fn load_instructions(&mut self, skill_id: &str) -> Result<String, SkillError> {
        let skill = self
            .skills
            .get(skill_id)
            .ok_or_else(|| SkillError::NotFound(skill_id.to_string()))?;

        if let Some(body) = &skill.instructions {
            return Ok(body.clone());
        }

        let skill_file = skill.path.join("SKILL.md");
        let content = tokio::fs::read_to_string(&skill_file)
            .await
            .map_err(|e| SkillError::ReadError(format!("{}: {e}", skill_file.display())))?;
        let (_metadata, body) = parse_skill_file(&content)?;

        let skill = self.skills.get_mut(skill_id).expect("skill present");
        skill.instructions = Some(body.clone());
        Ok(body)
    }

    pub fn exists(&self, skill_id: &str) -> bool {
        self.skills.contains_key(skill_id)
    }

    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.skills.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn manifests(&self) -> Vec<SkillManifest> {
        let mut out: Vec<SkillManifest> = self
            .skills
            .iter()
            .map(|(id, skill)| SkillManifest {
                id: id.clone(),
                name: skill.metadata.name.clone(),
                description: skill.metadata.description.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// YAML rendering of the discovery manifests, embedded into the system
    /// prompt.
    pub fn manifests_yaml(&self) -> String {
        serde_yaml::to_string(&self.manifests()).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn len(&self) -> usize {
        self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }
}

fn io_read_err(e: std::io::Error) -> SkillError {
    SkillError::ReadError(e.to_string())
}
