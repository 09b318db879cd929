//! Parser and rewriter for Obsidian-style wiki links
//!
//! Supports:
//! - Basic links: `[[Note]]`
//! - Aliases: `[[Note|Display Text]]`
//! - Headers: `[[Note#Header]]`
//! - Block references: `[[Note#^block-id]]`
//! - Embeds: `![[Note]]`
//! - Paths: `[[folder/Note]]`
//!
//! Every parsed link keeps the byte span it occupies in the source, so callers can
//! retarget links in place without disturbing the surrounding text.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A parsed wiki link.
///
/// Field naming follows Rust's `std::path::Path` conventions where applicable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WikiLink {
    /// The note name without path or extension: "Note" (like `Path::file_stem()`)
    pub name: String,
    /// The parent directory path: "Projects/Garden" or None for root (like `Path::parent()`)
    pub parent: Option<String>,
    /// File extension without the dot: "md", "canvas" or None (like `Path::extension()`)
    pub extension: Option<String>,
    /// Header reference if present: "Header Section"
    pub header: Option<String>,
    /// Block ID if present: "block-123"
    pub block_id: Option<String>,
    /// Display alias if present: "my custom text"
    pub alias: Option<String>,
    /// Whether this is an embed (`![[...]]`)
    pub is_embed: bool,
}

impl WikiLink {
    /// Returns the file name with extension if present: "Note.md" or "Note"
    pub fn file_name(&self) -> String {
        match &self.extension {
            Some(ext) => format!("{}.{}", self.name, ext),
            None => self.name.clone(),
        }
    }

    /// Returns the full path without fragment: "Projects/Garden/Note.md"
    pub fn path(&self) -> String {
        match &self.parent {
            Some(parent) => format!("{}/{}", parent, self.file_name()),
            None => self.file_name(),
        }
    }

    /// The note this link resolves to, with a `.md` extension dropped:
    /// `[[Garden/Garden.md#Beds]]` and `[[Garden/Garden]]` both target "Garden/Garden".
    ///
    /// Other extensions are kept, since `Garden/Garden.canvas` is a different file.
    pub fn note_target(&self) -> String {
        match self.extension.as_deref() {
            Some("md") | None => match &self.parent {
                Some(parent) => format!("{}/{}", parent, self.name),
                None => self.name.clone(),
            },
            Some(_) => self.path(),
        }
    }

    /// Returns alias if present, otherwise the name
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Copy of this link pointing at `target`, keeping fragment, alias and embed marker.
    ///
    /// A `.md` extension on the original link is carried over when `target` has none.
    pub fn retarget(&self, target: &str) -> WikiLink {
        let (parent, name, extension) = parse_path(target);
        let extension = match (extension, self.extension.as_deref()) {
            (Some(ext), _) => Some(ext),
            (None, Some("md")) => Some("md".to_string()),
            (None, _) => None,
        };
        WikiLink {
            name,
            parent,
            extension,
            header: self.header.clone(),
            block_id: self.block_id.clone(),
            alias: self.alias.clone(),
            is_embed: self.is_embed,
        }
    }

    /// Render the link back to markdown source.
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        if self.is_embed {
            out.push('!');
        }
        out.push_str("[[");
        out.push_str(&self.path());
        if let Some(block_id) = &self.block_id {
            out.push_str("#^");
            out.push_str(block_id);
        } else if let Some(header) = &self.header {
            out.push('#');
            out.push_str(header);
        }
        if let Some(alias) = &self.alias {
            out.push('|');
            out.push_str(alias);
        }
        out.push_str("]]");
        out
    }
}

/// A wiki link together with its byte span in the source text.
///
/// The span covers the whole markup, including the leading `!` of an embed.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkSpan {
    pub link: WikiLink,
    pub span: Range<usize>,
}

/// Find all wiki links in markdown content, with their byte spans.
pub fn find_wiki_links(content: &str) -> Vec<LinkSpan> {
    // `[`, `]` and `!` are ASCII, so byte scanning never lands inside a UTF-8 sequence.
    let bytes = content.as_bytes();
    let len = bytes.len();
    let mut links = Vec::new();
    let mut i = 0;

    while i < len {
        let is_embed = bytes[i] == b'!' && i + 2 < len && bytes[i + 1] == b'[' && bytes[i + 2] == b'[';
        let open = if is_embed { i + 1 } else { i };

        if open + 1 < len && bytes[open] == b'[' && bytes[open + 1] == b'[' {
            if let Some((inner, end)) = scan_link(bytes, open) {
                let link = parse_link_content(&content[inner], is_embed);
                links.push(LinkSpan { link, span: i..end });
                i = end;
                continue;
            }
        }
        i += 1;
    }

    links
}

/// Parse all wiki links from markdown content
pub fn parse_wiki_links(content: &str) -> Vec<WikiLink> {
    find_wiki_links(content)
        .into_iter()
        .map(|found| found.link)
        .collect()
}

/// Rewrite wiki links in `content`.
///
/// `retarget` is called for every link; returning `Some(target)` replaces that link's
/// path with `target` (see [`WikiLink::retarget`]). Returns `None` when nothing changed.
pub fn rewrite_links<F>(content: &str, mut retarget: F) -> Option<String>
where
    F: FnMut(&WikiLink) -> Option<String>,
{
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    let mut changed = false;

    for found in find_wiki_links(content) {
        let Some(target) = retarget(&found.link) else {
            continue;
        };
        let markup = found.link.retarget(&target).to_markup();
        if markup == content[found.span.clone()] {
            continue;
        }
        out.push_str(&content[last..found.span.start]);
        out.push_str(&markup);
        last = found.span.end;
        changed = true;
    }

    if !changed {
        return None;
    }
    out.push_str(&content[last..]);
    Some(out)
}

/// Scan a link whose opening `[[` starts at `start`.
/// Returns the byte range of the inner text and the position after the closing `]]`.
fn scan_link(bytes: &[u8], start: usize) -> Option<(Range<usize>, usize)> {
    let len = bytes.len();
    let content_start = start + 2;
    let mut i = content_start;
    let mut depth = 1;

    while i < len {
        match bytes[i] {
            // Links never span lines
            b'\n' => return None,
            b']' if i + 1 < len && bytes[i + 1] == b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some((content_start..i, i + 2));
                }
                i += 2;
                continue;
            }
            b'[' if i + 1 < len && bytes[i + 1] == b'[' => {
                depth += 1;
                i += 2;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    None
}

/// Parse the content inside [[ ]] into a WikiLink
fn parse_link_content(content: &str, is_embed: bool) -> WikiLink {
    let (target_part, alias) = match content.split_once('|') {
        Some((target, alias)) => (target, Some(alias.to_string())),
        None => (content, None),
    };

    let (path_part, header, block_id) = parse_fragment(target_part);
    let (parent, name, extension) = parse_path(path_part);

    WikiLink {
        name,
        parent,
        extension,
        header,
        block_id,
        alias,
        is_embed,
    }
}

/// Split a target into (path, header, block_id)
fn parse_fragment(target: &str) -> (&str, Option<String>, Option<String>) {
    if let Some((path, block_id)) = target.split_once("#^") {
        return (path, None, Some(block_id.to_string()));
    }
    if let Some((path, header)) = target.split_once('#') {
        return (path, Some(header.to_string()), None);
    }
    (target, None, None)
}

/// Parse a path string into (parent, name, extension)
fn parse_path(path: &str) -> (Option<String>, String, Option<String>) {
    let path = path.trim();

    let (parent, file_name) = match path.rsplit_once('/') {
        Some((parent, file_name)) => (Some(parent.to_string()), file_name),
        None => (None, path),
    };

    // A leading dot is part of the name, not an extension separator
    let (name, extension) = match file_name.rfind('.') {
        Some(dot) if dot > 0 => (
            file_name[..dot].to_string(),
            Some(file_name[dot + 1..].to_string()),
        ),
        _ => (file_name.to_string(), None),
    };

    (parent, name, extension)
}
