use gray_matter::engine::YAML;
use gray_matter::Matter;

use crate::SkillError;

/// Parsed skill front-matter. Only `name` and `description` matter for
/// routing; anything else in the front-matter is ignored.
#[derive(Debug, Clone, Default)]
pub struct SkillMetadata {
    pub name: String,
    pub description: String,
}

/// Parse a SKILL.md file into metadata + instruction body. A file without
/// front-matter is an invalid skill.
pub fn parse_skill_file(content: &str) -> Result<(SkillMetadata, String), SkillError> {
    let matter = Matter::<YAML>::new();
    let parsed = matter.parse(content);

    let data = parsed
        .data
        .ok_or_else(|| SkillError::ParseError("no frontmatter found".into()))?;

    let hash = data
        .as_hashmap()
        .map_err(|_| SkillError::ParseError("frontmatter is not a mapping".into()))?;

    let name = hash
        .get("name")
        .and_then(|v| v.as_string().ok())
        .ok_or_else(|| SkillError::MissingField("name".into()))?;
    let description = hash
        .get("description")
        .and_then(|v| v.as_string().ok())
        .unwrap_or_default();

    Ok((SkillMetadata { name, description }, parsed.content))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SKILL_MD: &str = r#"---
name: "web-search"
description: "Search the web and summarize results"
---
# Web Search

1. Build the query.
2. Run the search tool.
3. Cite sources in the answer.
"#;

    #[test]
    fn parse_full_skill() {
        let (meta, body) = parse_skill_file(SKILL_MD).unwrap();
        assert_eq!(meta.name, "web-search");
        assert_eq!(meta.description, "Search the web and summarize results");
        assert!(body.contains("Cite sources"));
    }

    #[test]
    fn parse_minimal_skill() {
        let content = "---\nname: \"simple\"\n---\nDo something simple.\n";
        let (meta, body) = parse_skill_file(content).unwrap();
        assert_eq!(meta.name, "simple");
        assert!(meta.description.is_empty());
        assert!(body.contains("Do something simple."));
    }

    #[test]
    fn parse_missing_name() {
        let content = "---\ndescription: \"nameless\"\n---\nbody\n";
        assert!(matches!(
            parse_skill_file(content),
            Err(SkillError::MissingField(_))
        ));
    }

    #[test]
    fn parse_no_frontmatter() {
        let content = "Just plain markdown with no frontmatter.";
        assert!(parse_skill_file(content).is_err());
    }
}
