//! FileSystem trait abstraction for the local document tree.
//!
//! Implementations:
//! - `InMemoryFs` - For testing
//! - `NativeFs` (in hubsync-cli) - Uses tokio::fs
//!
//! Paths are vault-relative, `/`-separated, without leading slash.

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// File or directory name (not full path)
    pub name: String,
    /// Whether this is a directory
    pub is_dir: bool,
}

/// Platform-independent filesystem abstraction.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read file contents
    async fn read(&self, path: &str) -> Result<Vec<u8>>;

    /// Write file contents (creates parent directories if needed)
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;

    /// List directory contents
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>>;

    /// Delete file or empty directory
    async fn delete(&self, path: &str) -> Result<()>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Create directory (and parents if needed)
    async fn mkdir(&self, path: &str) -> Result<()>;

    /// Move a file or a whole directory. The destination's parent must exist.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Read a file as UTF-8 text (lossy)
    async fn read_string(&self, path: &str) -> Result<String> {
        let bytes = self.read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// In-memory filesystem for testing.
///
/// Counts mutating calls so tests can assert that a run touched nothing.
pub struct InMemoryFs {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    dirs: RwLock<BTreeSet<String>>,
    mutations: AtomicUsize,
}

impl InMemoryFs {
    pub fn new() -> Self {
        let mut dirs = BTreeSet::new();
        dirs.insert(String::new()); // Root directory
        Self {
            files: RwLock::new(BTreeMap::new()),
            dirs: RwLock::new(dirs),
            mutations: AtomicUsize::new(0),
        }
    }

    /// Number of write/delete/rename/mkdir calls that changed something so far
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// All file paths, sorted
    pub fn file_paths(&self) -> Vec<String> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Read a file as text, None if missing
    pub fn text(&self, path: &str) -> Option<String> {
        let path = Self::normalize_path(path);
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    fn bump(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    fn normalize_path(path: &str) -> String {
        path.trim_matches('/').to_string()
    }

    fn parent_path(path: &str) -> Option<String> {
        let normalized = Self::normalize_path(path);
        if normalized.is_empty() {
            None
        } else {
            match normalized.rfind('/') {
                Some(pos) => Some(normalized[..pos].to_string()),
                None => Some(String::new()),
            }
        }
    }

    fn is_dir(&self, path: &str) -> bool {
        self.dirs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path)
    }

    fn is_file(&self, path: &str) -> bool {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(path)
    }
}

impl Default for InMemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-root `path` from under `from` to under `to`, if it lies inside `from`.
fn reroot(path: &str, from: &str, to: &str) -> Option<String> {
    if path == from {
        return Some(to.to_string());
    }
    path.strip_prefix(from)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(|rest| format!("{}/{}", to, rest))
}

#[async_trait]
impl FileSystem for InMemoryFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let path = Self::normalize_path(path);
        if self.is_dir(&path) {
            return Err(FsError::IsDirectory(path));
        }
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files
            .get(&path)
            .cloned()
            .ok_or_else(|| FsError::NotFound(path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let path = Self::normalize_path(path);
        if self.is_dir(&path) {
            return Err(FsError::IsDirectory(path));
        }

        // Create parent directories
        if let Some(parent) = Self::parent_path(&path) {
            self.mkdir(&parent).await?;
        }

        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path, content.to_vec());
        drop(files);
        self.bump();
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let path = Self::normalize_path(path);
        if !self.is_dir(&path) {
            return Err(if self.is_file(&path) {
                FsError::NotDirectory(path)
            } else {
                FsError::NotFound(path)
            });
        }

        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let direct_child = |candidate: &str| -> Option<String> {
            let rest = candidate.strip_prefix(&prefix)?;
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        };

        let mut entries = Vec::new();
        for dir in self.dirs.read().unwrap_or_else(|e| e.into_inner()).iter() {
            if let Some(name) = direct_child(dir) {
                entries.push(FileEntry { name, is_dir: true });
            }
        }
        for file in self.files.read().unwrap_or_else(|e| e.into_inner()).keys() {
            if let Some(name) = direct_child(file) {
                entries.push(FileEntry { name, is_dir: false });
            }
        }

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);

        // Try to delete as file first
        {
            let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
            if files.remove(&path).is_some() {
                drop(files);
                self.bump();
                return Ok(());
            }
        }

        if path.is_empty() || !self.is_dir(&path) {
            return Err(FsError::NotFound(path));
        }
        if !self.list(&path).await?.is_empty() {
            return Err(FsError::Io(format!("Directory not empty: {}", path)));
        }
        self.dirs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&path);
        self.bump();
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let path = Self::normalize_path(path);
        Ok(self.is_file(&path) || self.is_dir(&path))
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        let path = Self::normalize_path(path);
        if path.is_empty() || self.is_dir(&path) {
            return Ok(());
        }
        if self.is_file(&path) {
            return Err(FsError::NotDirectory(path));
        }

        // Create parent first
        if let Some(parent) = Self::parent_path(&path) {
            Box::pin(self.mkdir(&parent)).await?;
        }

        self.dirs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path);
        self.bump();
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from = Self::normalize_path(from);
        let to = Self::normalize_path(to);
        if from == to {
            return Ok(());
        }

        let to_parent = Self::parent_path(&to).unwrap_or_default();
        if !self.is_dir(&to_parent) {
            return Err(FsError::NotFound(to_parent));
        }

        if self.is_file(&from) {
            if self.is_dir(&to) {
                return Err(FsError::IsDirectory(to));
            }
            let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
            if let Some(content) = files.remove(&from) {
                files.insert(to, content);
            }
            drop(files);
            self.bump();
            return Ok(());
        }

        if !self.is_dir(&from) || from.is_empty() {
            return Err(FsError::NotFound(from));
        }
        if self.is_file(&to) || self.is_dir(&to) {
            return Err(FsError::AlreadyExists(to));
        }
        if to.starts_with(&format!("{}/", from)) {
            return Err(FsError::Io(format!("Cannot move {} into itself", from)));
        }

        {
            let mut dirs = self.dirs.write().unwrap_or_else(|e| e.into_inner());
            let moved: Vec<String> = dirs
                .iter()
                .filter(|d| reroot(d, &from, &to).is_some())
                .cloned()
                .collect();
            for dir in moved {
                dirs.remove(&dir);
                if let Some(new_dir) = reroot(&dir, &from, &to) {
                    dirs.insert(new_dir);
                }
            }
        }
        {
            let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
            let moved: Vec<String> = files
                .keys()
                .filter(|f| reroot(f, &from, &to).is_some())
                .cloned()
                .collect();
            for file in moved {
                if let (Some(content), Some(new_path)) =
                    (files.remove(&file), reroot(&file, &from, &to))
                {
                    files.insert(new_path, content);
                }
            }
        }
        self.bump();
        Ok(())
    }
}

/// Every file under `root`, sorted. Hidden directories (`.sync`, `.obsidian`) are skipped.
pub async fn walk_files<F: FileSystem + ?Sized>(fs: &F, root: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![root.trim_matches('/').to_string()];

    while let Some(dir) = pending.pop() {
        for entry in fs.list(&dir).await? {
            let path = if dir.is_empty() {
                entry.name.clone()
            } else {
                format!("{}/{}", dir, entry.name)
            };
            if entry.is_dir {
                if !entry.name.starts_with('.') {
                    pending.push(path);
                }
            } else {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Remove `dir` and then each parent while they are empty. Never removes the vault root.
///
/// Best-effort: a failure stops pruning and is only logged.
pub async fn prune_empty_dirs<F: FileSystem + ?Sized>(fs: &F, dir: &str) {
    let mut current = dir.trim_matches('/').to_string();
    while !current.is_empty() {
        match fs.list(&current).await {
            Ok(entries) if entries.is_empty() => {
                if let Err(e) = fs.delete(&current).await {
                    tracing::debug!("Could not prune {}: {}", current, e);
                    return;
                }
            }
            Ok(_) => return,
            Err(e) => {
                tracing::debug!("Could not list {} while pruning: {}", current, e);
                return;
            }
        }
        current = match current.rfind('/') {
            Some(pos) => current[..pos].to_string(),
            None => String::new(),
        };
    }
}

// Implement FileSystem for Arc<T> where T: FileSystem
// This allows a test to keep a handle on the filesystem an engine owns
#[async_trait]
impl<T: FileSystem + Send + Sync> FileSystem for std::sync::Arc<T> {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        (**self).read(path).await
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        (**self).write(path, content).await
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        (**self).list(path).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        (**self).delete(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        (**self).exists(path).await
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        (**self).mkdir(path).await
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        (**self).rename(from, to).await
    }
}
