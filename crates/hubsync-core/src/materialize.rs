//! Writes a remote record out as a local document.
//!
//! A document is front matter, a generated header block, a `---` separator and
//! then whatever the user wrote. The engine owns the front matter keys it sets and
//! the header; everything below the separator is carried over untouched.

use crate::canvas::{CanvasAction, sync_canvas};
use crate::content_hash::ContentHash;
use crate::error::Result;
use crate::fs::{FileSystem, FsError};
use crate::markdown::{self, LAST_SYNCED_KEY, ParsedMarkdown, REMOTE_ID_KEY, REMOTE_URL_KEY, TAGS_KEY};
use crate::moves::MoveKind;
use crate::node::{Field, PropertyMap, PropertyValue, RemoteNode};
use crate::options::SyncOptions;
use crate::paths::NodePath;
use crate::remote::RemoteStore;
use crate::sync_log::SyncLogEntry;
use crate::tree::ResolvedNode;
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

pub const ROOT_TAG: &str = "root";
pub const BRANCH_TAG: &str = "branch";

/// Line separating the generated header from the user section
const HEADER_SEPARATOR: &str = "---";

/// Whether the node's document has to be (re)written this run.
pub fn needs_materialization(
    entry: Option<&SyncLogEntry>,
    node: &RemoteNode,
    move_kind: MoveKind,
    document_exists: bool,
) -> bool {
    match entry {
        None => true,
        Some(entry) => {
            !document_exists || entry.last_edited != node.last_edited || move_kind.needs_render()
        }
    }
}

fn tag_for(resolved: &ResolvedNode) -> &'static str {
    if resolved.effective_parent.is_none() {
        ROOT_TAG
    } else {
        BRANCH_TAG
    }
}

/// Markdown link back to the remote record
pub fn remote_link_line(label: &str, url: &str) -> String {
    format!("[{}]({})", label, url)
}

/// The generated block above the separator.
pub fn render_header(
    resolved: &ResolvedNode,
    parent: Option<&NodePath>,
    options: &SyncOptions,
) -> String {
    let mut header = String::new();
    if let Some(url) = &resolved.node.url {
        header.push_str(&remote_link_line(&options.remote_link_label, url));
        header.push('\n');
    }
    if let Some(parent) = parent {
        header.push_str(&format!("*Parent*: [[{}]]\n", parent.link_target()));
    }
    if resolved.node.canvas_enabled() {
        header.push_str(&format!("*Canvas*: [[{}]]\n", resolved.path.canvas()));
    }
    header.push_str(HEADER_SEPARATOR);
    header.push('\n');
    header
}

/// The user-owned part of an existing body.
///
/// Bodies written by this engine carry a header ending in a separator line. Bodies
/// without one (hand-written or pushed documents) are kept whole, minus any bare
/// remote link line, which the header now provides.
pub fn user_section(body: &str, options: &SyncOptions) -> String {
    let link_prefix = format!("[{}](", options.remote_link_label);
    let generated = body.starts_with(&link_prefix)
        || body.starts_with("*Parent*:")
        || body.starts_with("*Canvas*:")
        || body.starts_with(HEADER_SEPARATOR);

    if generated {
        let mut offset = 0;
        for line in body.split_inclusive('\n') {
            offset += line.len();
            if line.trim_end() == HEADER_SEPARATOR {
                return body[offset..].to_string();
            }
        }
    }

    body.split_inclusive('\n')
        .filter(|line| {
            let line = line.trim();
            !(line.starts_with(&link_prefix) && line.ends_with(')'))
        })
        .collect()
}

/// Render the full document for a node, keeping the user section and any
/// front matter keys the engine does not own.
pub fn render_document(
    existing: Option<&ParsedMarkdown>,
    resolved: &ResolvedNode,
    parent: Option<&NodePath>,
    options: &SyncOptions,
    today: NaiveDate,
) -> ParsedMarkdown {
    let mut doc = existing.cloned().unwrap_or_default();
    let user = existing
        .map(|existing| user_section(&existing.body, options))
        .unwrap_or_default();

    doc.set_str(REMOTE_ID_KEY, resolved.node.id.as_str());
    match &resolved.node.url {
        Some(url) => doc.set_str(REMOTE_URL_KEY, url.clone()),
        None => {
            doc.frontmatter.remove(REMOTE_URL_KEY);
        }
    }
    doc.set_str(LAST_SYNCED_KEY, today.to_string());
    doc.set_strings(TAGS_KEY, &[tag_for(resolved).to_string()]);

    doc.body = format!("{}{}", render_header(resolved, parent, options), user);
    doc
}

/// Bookkeeping fields every synced record should carry.
pub fn desired_bookkeeping(
    document: &str,
    tag: &str,
    options: &SyncOptions,
    today: NaiveDate,
) -> PropertyMap {
    let mut desired = PropertyMap::new();
    desired.insert(Field::Path, PropertyValue::Text(document.to_string()));
    desired.insert(Field::LastSynced, PropertyValue::Date(today));
    desired.insert(Field::Tags, PropertyValue::Tags(vec![tag.to_string()]));
    desired.insert(
        Field::Status,
        PropertyValue::Status(options.status_complete.clone()),
    );
    desired
}

/// The subset of `desired` that differs from what the record already has.
pub fn bookkeeping_patch(node: &RemoteNode, desired: PropertyMap) -> PropertyMap {
    desired
        .into_iter()
        .filter(|(field, value)| node.properties.get(field) != Some(value))
        .collect()
}

/// Send the bookkeeping patch if anything differs, returning the fields sent and
/// the record's `last_edited` afterwards.
pub async fn apply_bookkeeping<R: RemoteStore + ?Sized>(
    remote: &R,
    node: &RemoteNode,
    desired: PropertyMap,
) -> Result<(usize, DateTime<Utc>)> {
    let patch = bookkeeping_patch(node, desired);
    if patch.is_empty() {
        return Ok((0, node.last_edited));
    }
    let fields = patch.len();
    remote.patch_properties(&node.id, patch).await?;

    // The patch itself bumps last_edited; log the post-bookkeeping value
    let last_edited = match remote.get_by_id(&node.id).await? {
        Some(fresh) => fresh.last_edited,
        None => node.last_edited,
    };
    debug!("Patched {} fields on {}", fields, node.id);
    Ok((fields, last_edited))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    /// Whether the document file was written
    pub written: bool,
    /// Number of bookkeeping fields patched remotely
    pub patched: usize,
    pub canvas: CanvasAction,
    /// Remote `last_edited` after bookkeeping
    pub last_edited: DateTime<Utc>,
    /// Fingerprint of the body now on disk
    pub fingerprint: ContentHash,
}

/// Write the node's document, sync its canvas and patch its bookkeeping fields.
pub async fn materialize<F, R>(
    fs: &F,
    remote: &R,
    entry: Option<&SyncLogEntry>,
    resolved: &ResolvedNode,
    parent: Option<&NodePath>,
    options: &SyncOptions,
    now: DateTime<Utc>,
) -> Result<Materialized>
where
    F: FileSystem + ?Sized,
    R: RemoteStore + ?Sized,
{
    let today = now.date_naive();
    let document = &resolved.path.document;

    let existing_text = match fs.read_string(document).await {
        Ok(text) => Some(text),
        Err(FsError::NotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let existing = existing_text.as_deref().map(markdown::parse);

    if let (Some(existing), Some(entry)) = (&existing, entry) {
        if existing.fingerprint() != entry.fingerprint {
            warn!(
                "{} was edited locally since the last sync; keeping the user section",
                document
            );
        }
    }

    let rendered = render_document(existing.as_ref(), resolved, parent, options, today);
    let text = rendered.to_markdown()?;
    let written = existing_text.as_deref() != Some(text.as_str());
    if written {
        fs.write(document, text.as_bytes()).await?;
        debug!("Wrote {}", document);
    }

    let canvas = sync_canvas(
        fs,
        &resolved.path,
        &resolved.node.title,
        resolved.node.canvas_enabled(),
    )
    .await?;

    let desired = desired_bookkeeping(document, tag_for(resolved), options, today);
    let (patched, last_edited) = apply_bookkeeping(remote, &resolved.node, desired).await?;

    Ok(Materialized {
        written,
        patched,
        canvas,
        last_edited,
        fingerprint: rendered.fingerprint(),
    })
}
