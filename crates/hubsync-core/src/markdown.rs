//! Markdown parsing and serialization with frontmatter support.
//!
//! Handles the conversion between raw markdown files and structured data
//! (frontmatter YAML + body text). Frontmatter keys are kept ordered so that
//! serializing the same document twice yields identical bytes.

use crate::content_hash::ContentHash;
use std::collections::BTreeMap;
use thiserror::Error;

/// Frontmatter keys owned by the sync engine
pub const REMOTE_ID_KEY: &str = "remote_id";
pub const REMOTE_URL_KEY: &str = "remote_url";
pub const LAST_SYNCED_KEY: &str = "last_synced";
pub const TAGS_KEY: &str = "tags";

pub type Frontmatter = BTreeMap<String, serde_yaml::Value>;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Frontmatter serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parsed markdown document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMarkdown {
    /// Frontmatter as key-value pairs (empty if the file has none)
    pub frontmatter: Frontmatter,
    /// Markdown body (everything after frontmatter)
    pub body: String,
}

impl ParsedMarkdown {
    /// Read a string-valued frontmatter key
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.frontmatter.get(key).and_then(|v| v.as_str())
    }

    /// Read a list of strings (a bare string counts as a one-element list)
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        match self.frontmatter.get(key) {
            Some(serde_yaml::Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(serde_yaml::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    pub fn set_str(&mut self, key: &str, value: impl Into<String>) {
        self.frontmatter
            .insert(key.to_string(), serde_yaml::Value::String(value.into()));
    }

    pub fn set_strings(&mut self, key: &str, values: &[String]) {
        let items = values
            .iter()
            .map(|v| serde_yaml::Value::String(v.clone()))
            .collect();
        self.frontmatter
            .insert(key.to_string(), serde_yaml::Value::Sequence(items));
    }

    /// Fingerprint of the body text
    pub fn fingerprint(&self) -> ContentHash {
        ContentHash::from_content(&self.body)
    }

    /// Serialize back to file content
    pub fn to_markdown(&self) -> Result<String, CodecError> {
        serialize(&self.frontmatter, &self.body)
    }
}

/// Parse a markdown file into frontmatter and body.
///
/// Frontmatter must be delimited by `---` at the start of the file:
/// ```markdown
/// ---
/// remote_id: 1f0c
/// tags: [root]
/// ---
///
/// # Content here
/// ```
pub fn parse(content: &str) -> ParsedMarkdown {
    let content = content.replace("\r\n", "\n");
    if !content.starts_with("---") {
        return ParsedMarkdown {
            frontmatter: Frontmatter::new(),
            body: content,
        };
    }

    let rest = &content[3..];
    match rest.find("\n---") {
        Some(pos) => {
            let yaml_content = rest[..pos].trim();
            let body_start = pos + 4; // Skip "\n---"

            // Skip any leading newlines after frontmatter
            let body = rest[body_start..].trim_start_matches('\n').to_string();

            // Invalid YAML is treated as no frontmatter
            let frontmatter = if yaml_content.is_empty() {
                Frontmatter::new()
            } else {
                serde_yaml::from_str::<Frontmatter>(yaml_content).unwrap_or_default()
            };

            ParsedMarkdown { frontmatter, body }
        }
        // No closing delimiter, treat entire content as body
        None => ParsedMarkdown {
            frontmatter: Frontmatter::new(),
            body: content,
        },
    }
}

/// Serialize frontmatter and body back to markdown.
pub fn serialize(frontmatter: &Frontmatter, body: &str) -> Result<String, CodecError> {
    if frontmatter.is_empty() {
        return Ok(body.to_string());
    }
    let yaml = serde_yaml::to_string(frontmatter)?;
    Ok(format!("---\n{}---\n\n{}", yaml, body))
}
