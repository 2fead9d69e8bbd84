//! Collision-free naming for uploads into a virtual folder.

use crate::models::DirectoryListing;
use std::collections::HashSet;

/// Pick the basename an upload should be stored under.
///
/// Returns `proposed` when it is free. Otherwise probes `stem(1).ext`,
/// `stem(2).ext`, ... and returns the first free candidate. The split happens
/// at the last `.`; a name without one gets the counter appended.
pub fn resolve_upload_key(existing: &HashSet<String>, proposed: &str) -> String {
    if !existing.contains(proposed) {
        return proposed.to_string();
    }

    let (stem, extension) = match proposed.rfind('.') {
        Some(dot) => (&proposed[..dot], Some(&proposed[dot + 1..])),
        None => (proposed, None),
    };

    (1u64..)
        .map(|n| match extension {
            Some(ext) => format!("{stem}({n}).{ext}"),
            None => format!("{stem}({n})"),
        })
        .find(|candidate| !existing.contains(candidate))
        .unwrap_or_else(|| unreachable!("u64 counter exhausted"))
}

/// Basenames of the files in `listing`, the collision set for an upload.
pub fn basenames_in(listing: &DirectoryListing) -> HashSet<String> {
    listing
        .files
        .iter()
        .map(|file| file.name().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileEntry, ObjectKey};

    fn names(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_free_name_is_unchanged() {
        assert_eq!(resolve_upload_key(&names(&[]), "photo.png"), "photo.png");
        assert_eq!(
            resolve_upload_key(&names(&["other.png"]), "photo.png"),
            "photo.png"
        );
    }

    #[test]
    fn test_probes_past_taken_counters() {
        let existing = names(&["photo.png", "photo(1).png"]);
        assert_eq!(resolve_upload_key(&existing, "photo.png"), "photo(2).png");
    }

    #[test]
    fn test_name_without_extension() {
        let existing = names(&["README", "README(1)"]);
        assert_eq!(resolve_upload_key(&existing, "README"), "README(2)");
    }

    #[test]
    fn test_splits_at_last_dot() {
        let existing = names(&["archive.tar.gz"]);
        assert_eq!(
            resolve_upload_key(&existing, "archive.tar.gz"),
            "archive.tar(1).gz"
        );
    }

    #[test]
    fn test_result_is_never_taken() {
        let mut existing = names(&["a.txt"]);
        for _ in 0..50 {
            let next = resolve_upload_key(&existing, "a.txt");
            assert!(!existing.contains(&next));
            existing.insert(next);
        }
        assert!(existing.contains("a(49).txt"));
    }

    #[test]
    fn test_basenames_in_listing() {
        let listing = DirectoryListing {
            folders: Default::default(),
            files: vec![FileEntry {
                key: ObjectKey::parse("uploads/docs/b.txt").unwrap(),
                size_bytes: 5,
            }],
        };
        assert_eq!(basenames_in(&listing), names(&["b.txt"]));
    }
}
