//! Listing records: what a backend reports and what a folder view shows.

use super::key::{DirectoryPath, ObjectKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A record exactly as a backend lists it.
///
/// `size_bytes` is `None` for folder placeholders. Any reported size, even
/// zero, marks a real object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub key: String,
    pub size_bytes: Option<u64>,
}

impl RawEntry {
    pub fn file(key: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            key: key.into(),
            size_bytes: Some(size_bytes),
        }
    }

    pub fn marker(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size_bytes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub key: ObjectKey,
    pub size_bytes: u64,
}

impl FileEntry {
    pub fn name(&self) -> &str {
        self.key.basename()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    pub path: DirectoryPath,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageEntry {
    File(FileEntry),
    Folder(FolderEntry),
}

/// One level of the virtual hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub folders: BTreeSet<DirectoryPath>,
    pub files: Vec<FileEntry>,
}

impl DirectoryListing {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }

    /// Folders first (sorted), then files in listing order.
    pub fn entries(&self) -> impl Iterator<Item = StorageEntry> + '_ {
        self.folders
            .iter()
            .map(|path| StorageEntry::Folder(FolderEntry { path: path.clone() }))
            .chain(self.files.iter().cloned().map(StorageEntry::File))
    }
}
