//! Container storage, payload format, and detection
//!
//! The container is the embedding origin every bundle lives in:
//! - **format**: binary payload format (entry section + trailer)
//! - **detect**: self-detection of a payload appended to an executable
//! - [`Container`]: path-keyed storage, either embedded (payload) or
//!   disk-backed (development directory)

pub mod detect;
pub mod format;

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use format::{ContainerTrailer, TRAILER_MAGIC, TRAILER_SIZE};

/// Raw byte-level lookup against the embedding origin.
///
/// Paths are container-absolute (already carrying any bundle prefix).
/// Returns `None` when nothing is stored at `path`.
pub trait ResourceStore: Send + Sync {
    /// Open a stream over the resource stored at `path`.
    fn open(&self, path: &str) -> Option<Box<dyn Read + Send>>;
}

/// A single entry in the container.
#[derive(Debug, Clone)]
pub enum ContainerEntry {
    /// Dev mode: file lives on disk, read on demand.
    DiskBacked(PathBuf),

    /// Payload mode: data embedded in the executable.
    Embedded(Arc<[u8]>),
}

/// Path-keyed resource storage.
///
/// Paths are normalized: forward slashes, no leading `./`, no trailing `/`.
#[derive(Debug, Clone, Default)]
pub struct Container {
    entries: HashMap<String, ContainerEntry>,
}

impl Container {
    /// Create an empty container.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a container holding the given `(path, data)` pairs in memory.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        let entries = entries
            .into_iter()
            .map(|(path, data)| (normalize_path(&path), ContainerEntry::Embedded(data.into())))
            .collect();
        Self { entries }
    }

    /// Create a disk-backed container mirroring every file under `root`.
    ///
    /// File contents are not read until opened.
    pub fn from_dir(root: &Path) -> std::io::Result<Self> {
        let mut files = Vec::new();
        collect_all_files(root, &mut files)?;

        let mut entries = HashMap::new();
        for path in files {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            entries.insert(relative, ContainerEntry::DiskBacked(path));
        }

        Ok(Self { entries })
    }

    /// Check if a path exists in the container.
    pub fn exists(&self, path: &str) -> bool {
        self.entries.contains_key(&normalize_path(path))
    }

    /// Number of entries in the container.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the container is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collect all entries for packing, sorted by path.
    ///
    /// DiskBacked entries are read from disk; unreadable files are skipped.
    pub fn collect_for_packing(&self) -> Vec<(String, Vec<u8>)> {
        let mut result = Vec::new();
        for (path, entry) in &self.entries {
            let data = match entry {
                ContainerEntry::DiskBacked(p) => match std::fs::read(p) {
                    Ok(data) => data,
                    Err(e) => {
                        tracing::warn!(path = %p.display(), error = %e, "skipping unreadable file");
                        continue;
                    }
                },
                ContainerEntry::Embedded(data) => data.to_vec(),
            };
            result.push((path.clone(), data));
        }
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }
}

impl ResourceStore for Container {
    fn open(&self, path: &str) -> Option<Box<dyn Read + Send>> {
        match self.entries.get(&normalize_path(path))? {
            ContainerEntry::Embedded(data) => Some(Box::new(Cursor::new(Arc::clone(data)))),
            ContainerEntry::DiskBacked(p) => match std::fs::File::open(p) {
                Ok(file) => Some(Box::new(file)),
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "container file vanished");
                    None
                }
            },
        }
    }
}

/// Normalize a path for container lookup.
///
/// - Replace backslashes with forward slashes
/// - Remove leading `./`
/// - Remove trailing `/`
fn normalize_path(path: &str) -> String {
    let mut p = path.replace('\\', "/");
    while let Some(rest) = p.strip_prefix("./") {
        p = rest.to_string();
    }
    while p.ends_with('/') {
        p.pop();
    }
    p
}

/// Recursively collect all files in a directory.
fn collect_all_files(dir: &Path, results: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_all_files(&path, results)?;
        } else {
            results.push(path);
        }
    }
    Ok(())
}
