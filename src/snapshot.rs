//! Directory snapshots and the three-way diff the watch loops act on.

use crate::emit::TEMP_PREFIX;
use crate::source::normalize_path;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    path: PathBuf,
    modified: SystemTime,
}

/// Every regular file under a directory with its modification time.
///
/// Keys compare case-insensitively, so a file whose name only changed case
/// is not reported as deleted and re-added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSnapshot {
    entries: BTreeMap<String, Entry>,
}

impl WatchSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks `dir` recursively.
    ///
    /// Files that vanish mid-walk are skipped, as are in-flight temporary
    /// files from atomic writes.
    pub fn scan(dir: &Path) -> Result<Self, walkdir::Error> {
        let mut snapshot = Self::new();

        for entry in WalkDir::new(dir) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if is_not_found(&e) => continue,
                Err(e) => return Err(e),
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            let modified = match entry.metadata() {
                Ok(meta) => meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                Err(e) if is_not_found(&e) => continue,
                Err(e) => return Err(e),
            };
            snapshot.insert(entry.path(), modified);
        }

        Ok(snapshot)
    }

    pub fn insert(&mut self, path: &Path, modified: SystemTime) {
        let path = normalize_path(path);
        self.entries.insert(key(&path), Entry { path, modified });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(&key(&normalize_path(path)))
    }

    /// Compares `self` (the older snapshot) against `newer`.
    pub fn diff(&self, newer: &WatchSnapshot) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for (key, entry) in &newer.entries {
            match self.entries.get(key) {
                None => changes.added.push(entry.path.clone()),
                Some(old) if old.modified != entry.modified => {
                    changes.modified.push(entry.path.clone())
                }
                Some(_) => {}
            }
        }
        for (key, entry) in &self.entries {
            if !newer.entries.contains_key(key) {
                changes.deleted.push(entry.path.clone());
            }
        }

        changes
    }
}

fn key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

fn is_not_found(e: &walkdir::Error) -> bool {
    e.io_error()
        .is_some_and(|io| io.kind() == io::ErrorKind::NotFound)
}

/// Files added, deleted and modified between two snapshots.
///
/// Each list is in path order. A rename shows up as one deletion plus one
/// addition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }

    /// Added and modified files.
    pub fn touched(&self) -> impl Iterator<Item = &PathBuf> {
        self.added.iter().chain(&self.modified)
    }
}
