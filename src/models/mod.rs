//! Core data models for the object gateway.
//!
//! Keys and directory paths model the virtual hierarchy over a flat key
//! space; entries and listings are what a folder view renders; the policy
//! and stored-object records belong to backends.

pub mod entry;
pub mod key;
pub mod object;
pub mod policy;

pub use entry::{DirectoryListing, FileEntry, FolderEntry, RawEntry, StorageEntry};
pub use key::{DirectoryPath, KeyError, ObjectKey};
pub use policy::{AccessPolicy, Action, Principal};
