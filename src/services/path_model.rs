//! Folds flat backend records into one level of the virtual hierarchy.

use crate::models::{DirectoryListing, DirectoryPath, FileEntry, ObjectKey, RawEntry};
use tracing::debug;

/// Derive the folder view of `query_prefix` from raw backend records.
///
/// - records outside the prefix, and the prefix itself, are ignored
/// - a sized record directly under the prefix becomes a file
/// - any record deeper down, placeholders included, surfaces as its first
///   folder below the prefix
/// - an unsized record directly under the prefix is a folder
///
/// File order follows the input; folders are deduplicated.
pub fn derive_listing<'a, I>(raw_entries: I, query_prefix: &DirectoryPath) -> DirectoryListing
where
    I: IntoIterator<Item = &'a RawEntry>,
{
    let prefix = query_prefix.as_str();
    let mut listing = DirectoryListing::default();

    for entry in raw_entries {
        let Some(relative) = entry.key.strip_prefix(prefix) else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }

        let folder = match (relative.find('/'), entry.size_bytes) {
            (Some(slash), _) => DirectoryPath::parse(format!("{}{}", prefix, &relative[..=slash])),
            (None, Some(size_bytes)) => {
                match ObjectKey::parse(entry.key.as_str()) {
                    Ok(key) => listing.files.push(FileEntry { key, size_bytes }),
                    Err(err) => debug!("skipping unlistable key {:?}: {}", entry.key, err),
                }
                continue;
            }
            // a placeholder reported without its trailing `/`
            (None, None) => DirectoryPath::from_key_prefix(&entry.key),
        };

        match folder {
            Ok(path) => {
                listing.folders.insert(path);
            }
            Err(err) => debug!("skipping unlistable folder {:?}: {}", entry.key, err),
        }
    }

    listing
}
