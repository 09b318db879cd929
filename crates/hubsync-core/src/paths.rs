//! Vault path helpers.
//!
//! A node titled `C` under ancestors `A` and `B` lives at `A/B/C/C.md`: every node
//! gets its own folder, and the folder nesting mirrors the remote parent chain.

use crate::node::NodeId;

/// Characters that cannot appear in a file name or would break wiki-link syntax
const FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '[', ']', '#', '^'];

/// Turn a record title into a single path segment.
///
/// Falls back to the record id when nothing usable is left.
pub fn sanitize_title(title: &str, id: &NodeId) -> String {
    let replaced: String = title
        .chars()
        .map(|c| if FORBIDDEN.contains(&c) || c.is_control() { ' ' } else { c })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_start_matches('.').trim();
    if trimmed.is_empty() {
        id.as_str().to_string()
    } else {
        trimmed.to_string()
    }
}

/// Where a node's document and side-artifact live.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodePath {
    /// Folder owned by the node, e.g. `A/B/C`
    pub dir: String,
    /// Document inside it, e.g. `A/B/C/C.md`
    pub document: String,
}

impl NodePath {
    /// Path for a node whose sanitized name is `name`, under `parent_dir` (None for roots)
    pub fn new(parent_dir: Option<&str>, name: &str, extension: &str) -> Self {
        let dir = match parent_dir {
            Some(parent) if !parent.is_empty() => format!("{}/{}", parent, name),
            _ => name.to_string(),
        };
        let document = format!("{}/{}.{}", dir, name, extension);
        Self { dir, document }
    }

    /// Rebuild from a document path such as `A/B/B.md`
    pub fn from_document(document: &str) -> Self {
        Self {
            dir: parent_dir(document).to_string(),
            document: document.to_string(),
        }
    }

    /// The folder's own name (last segment of `dir`)
    pub fn name(&self) -> &str {
        file_name(&self.dir)
    }

    /// `A/B/C/C.canvas`
    pub fn canvas(&self) -> String {
        format!("{}/{}.canvas", self.dir, self.name())
    }

    /// Wiki-link target for the document: the path without extension
    pub fn link_target(&self) -> String {
        strip_extension(&self.document).to_string()
    }
}

/// Everything before the last `/`, or "" at the vault root
pub fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|pos| &path[..pos]).unwrap_or("")
}

pub fn file_name(path: &str) -> &str {
    path.rfind('/').map(|pos| &path[pos + 1..]).unwrap_or(path)
}

/// Drop the final extension of the last segment
pub fn strip_extension(path: &str) -> &str {
    let name_start = path.rfind('/').map(|pos| pos + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => &path[..name_start + dot],
        _ => path,
    }
}

/// Number of `/`-separated segments above the file
pub fn depth(path: &str) -> usize {
    path.matches('/').count()
}

/// Whether `path` lies strictly inside `dir`
pub fn is_under(path: &str, dir: &str) -> bool {
    path.len() > dir.len() && path.starts_with(dir) && path.as_bytes()[dir.len()] == b'/'
}
