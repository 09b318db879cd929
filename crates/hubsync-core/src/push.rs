//! Pushes local documents that have no remote record yet.

use crate::content_hash::ContentHash;
use crate::error::Result;
use crate::fs::{FileSystem, walk_files};
use crate::markdown::{self, LAST_SYNCED_KEY, ParsedMarkdown, REMOTE_ID_KEY, REMOTE_URL_KEY, TAGS_KEY};
use crate::materialize::{BRANCH_TAG, ROOT_TAG, apply_bookkeeping, desired_bookkeeping, remote_link_line};
use crate::node::{Field, NewNode, NodeId, PropertyMap, PropertyValue};
use crate::options::SyncOptions;
use crate::paths::{depth, file_name, parent_dir, strip_extension};
use crate::remote::RemoteStore;
use crate::sync_log::{SyncLog, SyncLogEntry};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushReport {
    /// Documents pushed as new records, with their new ids
    pub created: Vec<(NodeId, String)>,
    /// Hub stubs written for top-level folders
    pub hubs_created: usize,
    /// Documents that already had a record
    pub skipped: usize,
    pub failed: Vec<(String, String)>,
}

/// The hub document of a folder: `A/B` -> `A/B/B.md`
fn hub_of(dir: &str, extension: &str) -> String {
    format!("{}/{}.{}", dir, file_name(dir), extension)
}

/// Title of a document: its first `# ` heading, else the file stem.
pub fn document_title(path: &str, body: &str) -> String {
    body.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
        .unwrap_or_else(|| strip_extension(file_name(path)).to_string())
}

/// Insert the remote link line right after the first H1, or at the top.
fn insert_link_line(body: &str, line: &str) -> String {
    if body.lines().any(|existing| existing.trim() == line) {
        return body.to_string();
    }
    let mut out = String::with_capacity(body.len() + line.len() + 1);
    let mut inserted = false;
    for existing in body.split_inclusive('\n') {
        out.push_str(existing);
        if !inserted && existing.starts_with("# ") {
            if !existing.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(line);
            out.push('\n');
            inserted = true;
        }
    }
    if inserted {
        out
    } else {
        format!("{}\n{}", line, body)
    }
}

/// Write `# <dir>` stubs for top-level folders that lack a hub document.
async fn create_hub_stubs<F: FileSystem + ?Sized>(fs: &F, extension: &str) -> Result<usize> {
    let mut created = 0;
    for entry in fs.list("").await? {
        if !entry.is_dir || entry.name.starts_with('.') {
            continue;
        }
        let hub = hub_of(&entry.name, extension);
        if !fs.exists(&hub).await? {
            fs.write(&hub, format!("# {}\n", entry.name).as_bytes()).await?;
            debug!("Created hub stub {}", hub);
            created += 1;
        }
    }
    Ok(created)
}

/// Nearest ancestor hub of `path` that already has a record.
///
/// Errors when an ancestor hub exists but could not be pushed, so the child is not
/// created at the wrong level.
fn parent_record(
    path: &str,
    documents: &HashSet<String>,
    known: &HashMap<String, NodeId>,
    extension: &str,
) -> std::result::Result<Option<NodeId>, String> {
    let mut dir = parent_dir(path);
    while !dir.is_empty() {
        let hub = hub_of(dir, extension);
        if hub != path {
            if let Some(id) = known.get(&hub) {
                return Ok(Some(id.clone()));
            }
            if documents.contains(&hub) {
                return Err(format!("parent {} has no remote record", hub));
            }
        }
        dir = parent_dir(dir);
    }
    Ok(None)
}

/// Create remote records for every local document that lacks one.
pub async fn push<F, R>(
    fs: &F,
    remote: &R,
    log: &mut SyncLog,
    options: &SyncOptions,
    now: DateTime<Utc>,
) -> Result<PushReport>
where
    F: FileSystem + ?Sized,
    R: RemoteStore + ?Sized,
{
    let mut report = PushReport {
        hubs_created: create_hub_stubs(fs, &options.extension).await?,
        ..Default::default()
    };

    let suffix = format!(".{}", options.extension);
    let mut paths: Vec<String> = walk_files(fs, "")
        .await?
        .into_iter()
        .filter(|path| path.ends_with(&suffix) && path.contains('/'))
        .collect();
    paths.sort_by(|a, b| (depth(a), a).cmp(&(depth(b), b)));
    let documents: HashSet<String> = paths.iter().cloned().collect();

    let mut parsed: Vec<(String, ParsedMarkdown)> = Vec::with_capacity(paths.len());
    let mut known: HashMap<String, NodeId> = HashMap::new();
    for path in paths {
        let doc = markdown::parse(&fs.read_string(&path).await?);
        if let Some(id) = doc.get_str(REMOTE_ID_KEY) {
            known.insert(path.clone(), NodeId::new(id));
            report.skipped += 1;
        }
        parsed.push((path, doc));
    }

    for (path, doc) in parsed {
        if known.contains_key(&path) {
            continue;
        }
        let parent = match parent_record(&path, &documents, &known, &options.extension) {
            Ok(parent) => parent,
            Err(reason) => {
                warn!("Not pushing {}: {}", path, reason);
                report.failed.push((path, reason));
                continue;
            }
        };
        match push_document(fs, remote, log, options, now, &path, doc, parent).await {
            Ok(id) => {
                info!("Pushed {} as {}", path, id);
                known.insert(path.clone(), id.clone());
                report.created.push((id, path));
            }
            Err(e) => {
                warn!("Failed to push {}: {}", path, e);
                report.failed.push((path, e.to_string()));
            }
        }
    }

    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn push_document<F, R>(
    fs: &F,
    remote: &R,
    log: &mut SyncLog,
    options: &SyncOptions,
    now: DateTime<Utc>,
    path: &str,
    mut doc: ParsedMarkdown,
    parent: Option<NodeId>,
) -> Result<NodeId>
where
    F: FileSystem + ?Sized,
    R: RemoteStore + ?Sized,
{
    let today = now.date_naive();
    let local_tags = doc.get_strings(TAGS_KEY);
    let mut properties = PropertyMap::new();
    if !local_tags.is_empty() {
        properties.insert(Field::Tags, PropertyValue::Tags(local_tags.clone()));
    }

    let created = remote
        .create(NewNode {
            title: document_title(path, &doc.body),
            parent: parent.clone(),
            properties,
        })
        .await?;

    let tag = if parent.is_some() { BRANCH_TAG } else { ROOT_TAG };
    let mut desired = desired_bookkeeping(path, tag, options, today);
    if !local_tags.is_empty() {
        desired.remove(&Field::Tags);
    }
    let (_, last_edited) = apply_bookkeeping(remote, &created, desired).await?;

    doc.set_str(REMOTE_ID_KEY, created.id.as_str());
    if let Some(url) = &created.url {
        doc.set_str(REMOTE_URL_KEY, url.clone());
        doc.body = insert_link_line(&doc.body, &remote_link_line(&options.remote_link_label, url));
    }
    doc.set_str(LAST_SYNCED_KEY, today.to_string());
    let text = doc.to_markdown()?;
    fs.write(path, text.as_bytes()).await?;

    log.upsert(
        created.id.clone(),
        SyncLogEntry {
            parent_id: parent,
            last_edited,
            path: path.to_string(),
            fingerprint: ContentHash::from_content(&doc.body),
            synced_at: now,
        },
    );
    Ok(created.id)
}
