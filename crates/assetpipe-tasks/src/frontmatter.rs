//! Page front matter extraction.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Front matter of an HTML page.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PageMeta {
    /// Layout to wrap the page in (`none` renders the page alone)
    #[serde(default)]
    pub layout: Option<String>,

    /// Every other key, exposed to templates as a variable
    #[serde(flatten)]
    pub data: BTreeMap<String, serde_yaml::Value>,
}

/// Extract front matter from a page.
///
/// Returns the parsed front matter and the remaining content after the block.
pub fn extract_frontmatter(source: &str) -> Result<(Option<PageMeta>, &str), FrontmatterError> {
    let trimmed = source.trim_start();

    if !trimmed.starts_with("---") {
        return Ok((None, source));
    }

    let after_open = &trimmed[3..];
    let Some(close_pos) = after_open.find("\n---") else {
        return Err(FrontmatterError::Unclosed);
    };

    let yaml_content = after_open[..close_pos].trim();
    let remaining = &after_open[close_pos + 4..];

    let meta = if yaml_content.is_empty() {
        PageMeta::default()
    } else {
        serde_yaml::from_str(yaml_content)
            .map_err(|e| FrontmatterError::InvalidYaml(e.to_string()))?
    };

    Ok((Some(meta), remaining.trim_start()))
}

/// Errors that can occur when parsing front matter.
#[derive(Debug, thiserror::Error)]
pub enum FrontmatterError {
    #[error("Unclosed front matter block - missing closing ---")]
    Unclosed,

    #[error("Invalid YAML in front matter: {0}")]
    InvalidYaml(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_layout_and_variables() {
        let source = r#"---
layout: landing
title: Home
---

<h1>{{ title }}</h1>
"#;

        let (meta, content) = extract_frontmatter(source).unwrap();
        let meta = meta.unwrap();

        assert_eq!(meta.layout.as_deref(), Some("landing"));
        assert_eq!(
            meta.data.get("title"),
            Some(&serde_yaml::Value::String("Home".to_string()))
        );
        assert!(content.starts_with("<h1>"));
    }

    #[test]
    fn handles_no_frontmatter() {
        let source = "<p>No front matter here.</p>";

        let (meta, content) = extract_frontmatter(source).unwrap();

        assert!(meta.is_none());
        assert_eq!(content, source);
    }

    #[test]
    fn accepts_empty_block() {
        let (meta, content) = extract_frontmatter("---\n---\n<p>x</p>").unwrap();

        assert_eq!(meta, Some(PageMeta::default()));
        assert_eq!(content, "<p>x</p>");
    }

    #[test]
    fn errors_on_unclosed_frontmatter() {
        let result = extract_frontmatter("---\ntitle: Test\n<p>no closing</p>");

        assert!(matches!(result, Err(FrontmatterError::Unclosed)));
    }

    #[test]
    fn errors_on_invalid_yaml() {
        let result = extract_frontmatter("---\ntitle: [invalid yaml\n---\n");

        assert!(matches!(result, Err(FrontmatterError::InvalidYaml(_))));
    }
}
