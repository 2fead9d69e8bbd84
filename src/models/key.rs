//! Object keys and the virtual directory paths derived from them.
//!
//! Keys are flat `/`-delimited UTF-8 strings. A [`DirectoryPath`] is a key
//! prefix ending in `/`; it has no existence of its own beyond the keys that
//! start with it.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MAX_OBJECT_KEY_LEN: usize = 1024;

/// Root of the shared upload area.
pub const DEFAULT_ROOT: &str = "uploads/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("object key must not be empty")]
    Empty,
    #[error("object key `{0}` must not start with `/`")]
    LeadingSlash(String),
    #[error("object key is longer than {MAX_OBJECT_KEY_LEN} bytes")]
    TooLong,
    #[error("object key `{0}` contains a `..` segment")]
    ParentSegment(String),
    #[error("object key `{0}` contains control characters or `\\`")]
    IllegalCharacter(String),
    #[error("directory path `{0}` must end with `/`")]
    NotADirectory(String),
    #[error("folder name `{0}` must be a single non-empty path segment")]
    InvalidBasename(String),
}

/// Full path of a stored object. Never empty, never starts with `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn parse(raw: impl Into<String>) -> Result<Self, KeyError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(KeyError::Empty);
        }
        if raw.len() > MAX_OBJECT_KEY_LEN {
            return Err(KeyError::TooLong);
        }
        if raw.starts_with('/') {
            return Err(KeyError::LeadingSlash(raw));
        }
        if raw.split('/').any(|segment| segment == "..") {
            return Err(KeyError::ParentSegment(raw));
        }
        if raw.chars().any(|c| c.is_ascii_control() || c == '\\') {
            return Err(KeyError::IllegalCharacter(raw));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, e.g. `b.txt` for `uploads/docs/b.txt`.
    pub fn basename(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.0)
    }

    /// Keys ending in `/` are folder placeholders.
    pub fn is_folder_marker(&self) -> bool {
        self.0.ends_with('/')
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ObjectKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ObjectKey> for String {
    fn from(key: ObjectKey) -> Self {
        key.0
    }
}

/// A virtual folder: an [`ObjectKey`] prefix that ends with `/`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DirectoryPath(String);

impl DirectoryPath {
    pub fn parse(raw: impl Into<String>) -> Result<Self, KeyError> {
        let key = ObjectKey::parse(raw)?;
        if !key.is_folder_marker() {
            return Err(KeyError::NotADirectory(key.0));
        }
        Ok(Self(key.0))
    }

    pub fn default_root() -> Self {
        Self(DEFAULT_ROOT.to_string())
    }

    /// Builds a directory path from a key, appending `/` when missing.
    pub fn from_key_prefix(raw: &str) -> Result<Self, KeyError> {
        if raw.ends_with('/') {
            Self::parse(raw)
        } else {
            Self::parse(format!("{raw}/"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Folder name without the trailing `/`, e.g. `docs` for `uploads/docs/`.
    pub fn basename(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.0)
    }

    /// Appends one folder segment. The segment must not be empty and must
    /// not contain `/`; a single trailing `/` is tolerated.
    pub fn child(&self, basename: &str) -> Result<Self, KeyError> {
        let segment = basename.strip_suffix('/').unwrap_or(basename);
        if segment.is_empty() || segment.contains('/') || segment == "." {
            return Err(KeyError::InvalidBasename(basename.to_string()));
        }
        Self::parse(format!("{}{}/", self.0, segment))
    }

    /// Key of a file directly inside this folder.
    pub fn join_file(&self, basename: &str) -> Result<ObjectKey, KeyError> {
        if basename.is_empty() || basename.contains('/') {
            return Err(KeyError::InvalidBasename(basename.to_string()));
        }
        ObjectKey::parse(format!("{}{}", self.0, basename))
    }

    /// Parent folder, or `None` for a single-segment path.
    pub fn parent(&self) -> Option<Self> {
        let trimmed = self.0.trim_end_matches('/');
        let cut = trimmed.rfind('/')?;
        Some(Self(trimmed[..=cut].to_string()))
    }

    pub fn as_key(&self) -> ObjectKey {
        ObjectKey(self.0.clone())
    }
}

impl fmt::Display for DirectoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DirectoryPath {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DirectoryPath> for String {
    fn from(path: DirectoryPath) -> Self {
        path.0
    }
}
