//! Current-directory cursor over the virtual hierarchy.

use crate::models::{DirectoryPath, KeyError};
use serde::Serialize;

/// Cursor that never leaves the subtree under `root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavigationState {
    root: DirectoryPath,
    current: DirectoryPath,
}

impl NavigationState {
    pub fn new(root: DirectoryPath) -> Self {
        Self {
            current: root.clone(),
            root,
        }
    }

    pub fn root(&self) -> &DirectoryPath {
        &self.root
    }

    pub fn current(&self) -> &DirectoryPath {
        &self.current
    }

    pub fn is_at_root(&self) -> bool {
        self.current == self.root
    }

    /// Step into `folder`. Whether anything lives there is not checked; an
    /// unknown folder simply lists empty.
    pub fn enter(&mut self, folder: &str) -> Result<&DirectoryPath, KeyError> {
        self.current = self.current.child(folder)?;
        Ok(&self.current)
    }

    /// Step to the parent folder. A no-op at the root.
    pub fn up(&mut self) -> &DirectoryPath {
        if !self.is_at_root() {
            self.current = match self.current.parent() {
                Some(parent) if parent.as_str().starts_with(self.root.as_str()) => parent,
                _ => self.root.clone(),
            };
        }
        &self.current
    }

    /// Folder names between the root and the cursor, outermost first.
    pub fn breadcrumbs(&self) -> Vec<&str> {
        self.current
            .as_str()
            .strip_prefix(self.root.as_str())
            .unwrap_or_default()
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect()
    }
}

impl Default for NavigationState {
    fn default() -> Self {
        Self::new(DirectoryPath::default_root())
    }
}
