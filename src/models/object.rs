//! Metadata row for an object held by the local backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A stored object (blob) addressed by its key.
///
/// Holds metadata only; the payload lives on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Full object key, e.g. `uploads/docs/report.pdf`.
    pub key: String,

    /// Last path segment of the key.
    pub filename: String,

    /// Content type (MIME type), if the uploader supplied one.
    pub content_type: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the payload, lowercase hex.
    pub etag: Option<String>,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,

    /// Soft-delete flag.
    pub is_deleted: bool,
}

impl StoredObject {
    pub fn is_folder_marker(&self) -> bool {
        self.key.ends_with('/')
    }
}
