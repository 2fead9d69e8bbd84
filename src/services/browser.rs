//! One user's browsing context: cursor, upload slot and gateway.
//!
//! Each method answers one UI event (list, navigate, upload, download). The
//! cursor lock is only ever held for synchronous work, never across an
//! `.await`; upload progress is published on a `watch` channel so status
//! reads never wait on a running upload.

use crate::models::{DirectoryListing, DirectoryPath, KeyError, ObjectKey};
use crate::services::{
    gateway::{GatewayError, StorageGateway},
    name_resolver::{basenames_in, resolve_upload_key},
    navigation::NavigationState,
    upload_session::{UploadSession, drive_upload},
};
use bytes::Bytes;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    InvalidKey(#[from] KeyError),
    #[error("an upload into `{0}` is still running")]
    UploadInProgress(String),
    #[error("upload task ended abnormally: {0}")]
    UploadAborted(String),
    #[error("no file selected")]
    NoFileSelected,
}

pub type SessionResult<T> = Result<T, SessionError>;

fn lock_slot(reserved: &Mutex<Option<DirectoryPath>>) -> MutexGuard<'_, Option<DirectoryPath>> {
    reserved.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held by the task running an upload. Dropping it frees the slot and fails
/// a session that never settled.
struct UploadSlot {
    reserved: Arc<Mutex<Option<DirectoryPath>>>,
    upload: Arc<watch::Sender<Option<UploadSession>>>,
}

impl Drop for UploadSlot {
    fn drop(&mut self) {
        self.upload.send_if_modified(|current| match current {
            Some(upload) if !upload.is_terminal() => {
                upload.fail("upload interrupted");
                true
            }
            _ => false,
        });
        *lock_slot(&self.reserved) = None;
    }
}

/// Cheap to clone; clones share the same cursor and upload slot.
#[derive(Clone)]
pub struct BrowserSession {
    gateway: StorageGateway,
    default_ttl_secs: u64,
    navigation: Arc<Mutex<NavigationState>>,
    /// Target folder of the upload holding the slot.
    reserved: Arc<Mutex<Option<DirectoryPath>>>,
    upload: Arc<watch::Sender<Option<UploadSession>>>,
}

impl BrowserSession {
    pub fn new(
        gateway: StorageGateway,
        root: DirectoryPath,
        default_ttl_secs: u64,
    ) -> Self {
        let (upload, _) = watch::channel(None);
        Self {
            gateway,
            default_ttl_secs,
            navigation: Arc::new(Mutex::new(NavigationState::new(root))),
            reserved: Arc::new(Mutex::new(None)),
            upload: Arc::new(upload),
        }
    }

    fn nav(&self) -> MutexGuard<'_, NavigationState> {
        // a poisoned cursor is still a valid DirectoryPath
        self.navigation
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the cursor.
    pub fn navigation(&self) -> NavigationState {
        self.nav().clone()
    }

    pub fn current_dir(&self) -> DirectoryPath {
        self.nav().current().clone()
    }

    /// Listing of the current directory, fetched fresh every time.
    pub async fn listing(&self) -> SessionResult<DirectoryListing> {
        let dir = self.current_dir();
        Ok(self.gateway.list_directory(&dir).await?)
    }

    pub fn enter(&self, folder: &str) -> SessionResult<DirectoryPath> {
        let mut nav = self.nav();
        let path = nav.enter(folder)?.clone();
        info!("entered {}", path);
        Ok(path)
    }

    pub fn up(&self) -> DirectoryPath {
        let mut nav = self.nav();
        nav.up().clone()
    }

    /// Resolve the folder an upload goes to: the cursor, or a sub-path of
    /// it when `folder_input` is non-empty (`docs` or `docs/2024`).
    pub fn upload_target(&self, folder_input: &str) -> SessionResult<DirectoryPath> {
        let mut target = self.current_dir();
        for segment in folder_input
            .trim()
            .split('/')
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
        {
            target = target.child(segment)?;
        }
        Ok(target)
    }

    /// Upload `payload` as `basename` without overwriting anything already
    /// in the target folder. Returns the key it was stored under.
    ///
    /// Only one upload runs at a time per session. The upload runs on its
    /// own task: once started it settles even if the caller goes away.
    pub async fn upload(
        &self,
        basename: &str,
        folder_input: &str,
        payload: Bytes,
    ) -> SessionResult<ObjectKey> {
        let basename = basename.trim();
        if basename.is_empty() {
            return Err(SessionError::NoFileSelected);
        }
        let target_dir = self.upload_target(folder_input)?;
        let requested = target_dir.join_file(basename)?;
        let slot = self.claim_upload_slot(&target_dir)?;

        let session = self.clone();
        let task = tokio::spawn(async move {
            let _slot = slot;
            session.run_upload(&target_dir, requested, payload).await
        });
        match task.await {
            Ok(outcome) => outcome,
            Err(err) => Err(SessionError::UploadAborted(err.to_string())),
        }
    }

    async fn run_upload(
        &self,
        target_dir: &DirectoryPath,
        requested: ObjectKey,
        payload: Bytes,
    ) -> SessionResult<ObjectKey> {
        let size_bytes = payload.len() as u64;
        let outcome = self
            .resolve_and_upload(target_dir, requested.basename(), payload)
            .await;
        if let Err(err) = &outcome {
            // a failure before the put has no session yet
            let reason = err.to_string();
            self.upload.send_modify(|current| match current {
                Some(upload) => upload.fail(reason),
                None => {
                    let mut failed = UploadSession::new(requested, size_bytes);
                    failed.fail(reason);
                    *current = Some(failed);
                }
            });
        }
        outcome
    }

    async fn resolve_and_upload(
        &self,
        target_dir: &DirectoryPath,
        basename: &str,
        payload: Bytes,
    ) -> SessionResult<ObjectKey> {
        let existing = basenames_in(&self.gateway.list_directory(target_dir).await?);
        let resolved = resolve_upload_key(&existing, basename);
        let key = target_dir.join_file(&resolved)?;
        let size_bytes = payload.len() as u64;

        self.upload
            .send_replace(Some(UploadSession::new(key.clone(), size_bytes)));
        drive_upload(&self.gateway, &self.upload, payload).await?;
        Ok(key)
    }

    /// Reserve the single upload slot, refusing while another upload holds
    /// it. An unread outcome of the previous upload is dropped; the new
    /// session is published only once its key is resolved.
    fn claim_upload_slot(&self, target_dir: &DirectoryPath) -> SessionResult<UploadSlot> {
        {
            let mut reserved = lock_slot(&self.reserved);
            if let Some(busy) = reserved.as_ref() {
                return Err(SessionError::UploadInProgress(busy.to_string()));
            }
            *reserved = Some(target_dir.clone());
        }
        self.upload.send_replace(None);
        Ok(UploadSlot {
            reserved: self.reserved.clone(),
            upload: self.upload.clone(),
        })
    }

    /// Current upload, if any. A finished upload is reported once and then
    /// cleared.
    pub fn upload_status(&self) -> Option<UploadSession> {
        let mut observed = None;
        self.upload.send_if_modified(|current| {
            observed = current.clone();
            if current.as_ref().is_some_and(UploadSession::is_terminal) {
                *current = None;
                true
            } else {
                false
            }
        });
        observed
    }

    /// Presigned download URL; `ttl_secs` falls back to the configured
    /// default.
    pub async fn download_url(&self, key: &str, ttl_secs: Option<u64>) -> SessionResult<String> {
        let key = ObjectKey::parse(key)?;
        let ttl = ttl_secs.unwrap_or(self.default_ttl_secs);
        Ok(self.gateway.get_download_url(&key, ttl).await?)
    }

    /// Create an empty folder under the cursor.
    pub async fn create_folder(&self, name: &str) -> SessionResult<DirectoryPath> {
        let path = self.current_dir().child(name.trim())?;
        self.gateway.create_folder(&path).await?;
        info!("created folder {}", path);
        Ok(path)
    }

    pub async fn delete(&self, key: &str) -> SessionResult<()> {
        let key = ObjectKey::parse(key)?;
        self.gateway.delete(&key).await?;
        info!("deleted {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::MemoryBackend;
    use crate::services::upload_session::UploadStatus;
    use std::time::Duration;

    fn session_with(backend: Arc<MemoryBackend>) -> BrowserSession {
        BrowserSession::new(
            StorageGateway::new(backend),
            DirectoryPath::default_root(),
            900,
        )
    }

    #[tokio::test]
    async fn test_repeat_uploads_never_overwrite() {
        let backend = Arc::new(MemoryBackend::default());
        let session = session_with(backend.clone());

        let first = session
            .upload("photo.png", "", Bytes::from_static(b"one"))
            .await
            .unwrap();
        let second = session
            .upload("photo.png", "", Bytes::from_static(b"two"))
            .await
            .unwrap();
        let third = session
            .upload("photo.png", "", Bytes::from_static(b"three"))
            .await
            .unwrap();

        assert_eq!(first.as_str(), "uploads/photo.png");
        assert_eq!(second.as_str(), "uploads/photo(1).png");
        assert_eq!(third.as_str(), "uploads/photo(2).png");
        assert_eq!(backend.get("uploads/photo.png").unwrap(), Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_upload_into_named_subfolder() {
        let backend = Arc::new(MemoryBackend::default());
        let session = session_with(backend.clone());
        session.enter("docs").unwrap();

        let key = session
            .upload("b.txt", " 2024/q1 ", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(key.as_str(), "uploads/docs/2024/q1/b.txt");

        let listing = session.listing().await.unwrap();
        let folders: Vec<&str> = listing.folders.iter().map(|f| f.as_str()).collect();
        assert_eq!(folders, vec!["uploads/docs/2024/"]);
    }

    #[tokio::test]
    async fn test_upload_status_is_cleared_after_terminal_read() {
        let backend = Arc::new(MemoryBackend::default());
        backend.script_progress(vec![33, 66, 100]);
        let session = session_with(backend);
        assert!(session.upload_status().is_none());

        session
            .upload("a.txt", "", Bytes::from_static(b"abc"))
            .await
            .unwrap();

        let status = session.upload_status().unwrap();
        assert_eq!(status.status(), &UploadStatus::Succeeded);
        assert_eq!(status.last_percent(), 100);
        assert!(session.upload_status().is_none());
    }

    #[tokio::test]
    async fn test_second_upload_is_refused_while_one_runs() {
        let backend = Arc::new(MemoryBackend::default());
        let session = session_with(backend);
        let slot = session
            .claim_upload_slot(&DirectoryPath::parse("uploads/big/").unwrap())
            .unwrap();

        let err = session
            .upload("other.txt", "", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UploadInProgress(folder) if folder == "uploads/big/"));

        drop(slot);
        session
            .upload("other.txt", "", Bytes::from_static(b"x"))
            .await
            .unwrap();
    }

    async fn upload_when_free(session: &BrowserSession, name: &str) -> ObjectKey {
        for _ in 0..200 {
            match session.upload(name, "", Bytes::from_static(b"next")).await {
                Err(SessionError::UploadInProgress(_)) => {
                    tokio::time::sleep(Duration::from_millis(10)).await
                }
                other => return other.unwrap(),
            }
        }
        panic!("upload slot was never freed");
    }

    #[tokio::test]
    async fn test_upload_outlives_a_dropped_caller() {
        let backend = Arc::new(MemoryBackend::default());
        backend.hold_puts();
        let session = session_with(backend.clone());

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            session.upload("a.txt", "", Bytes::from_static(b"abc")),
        )
        .await;
        assert!(abandoned.is_err());

        // the first upload is still running and keeps the slot
        let status = session.upload_status().unwrap();
        assert_eq!(status.target_key().as_str(), "uploads/a.txt");
        assert!(!status.is_terminal());
        assert!(matches!(
            session.upload("b.txt", "", Bytes::from_static(b"b")).await,
            Err(SessionError::UploadInProgress(_))
        ));

        backend.release_puts();
        let key = upload_when_free(&session, "b.txt").await;
        assert_eq!(key.as_str(), "uploads/b.txt");
        assert!(backend.contains("uploads/a.txt"));
        assert!(backend.contains("uploads/b.txt"));
    }

    #[tokio::test]
    async fn test_status_shows_only_the_resolved_key() {
        let backend = Arc::new(MemoryBackend::default());
        backend.insert("uploads/photo.png", b"old");
        backend.hold_lists();
        let session = session_with(backend.clone());

        let running = tokio::spawn({
            let session = session.clone();
            async move {
                session
                    .upload("photo.png", "", Bytes::from_static(b"new"))
                    .await
            }
        });
        while backend.list_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // name lookup in flight: nothing is published yet
        assert!(session.upload_status().is_none());

        backend.release_lists();
        let key = running.await.unwrap().unwrap();
        assert_eq!(key.as_str(), "uploads/photo(1).png");
        let status = session.upload_status().unwrap();
        assert_eq!(status.target_key(), &key);
        assert_eq!(status.status(), &UploadStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_failed_upload_settles_session() {
        let backend = Arc::new(MemoryBackend::default());
        backend.fail_next_list(GatewayError::Network("connection reset".into()));
        let session = session_with(backend);

        let err = session
            .upload("a.txt", "", Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Gateway(GatewayError::Network(_))));

        let status = session.upload_status().unwrap();
        assert!(matches!(status.status(), UploadStatus::Failed { .. }));
        // the slot is free again
        session
            .upload("a.txt", "", Bytes::from_static(b"abc"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejects_empty_file_name_and_bad_folder() {
        let session = session_with(Arc::new(MemoryBackend::default()));
        assert!(matches!(
            session.upload("  ", "", Bytes::new()).await,
            Err(SessionError::NoFileSelected)
        ));
        assert!(matches!(
            session.upload("a.txt", "../etc", Bytes::new()).await,
            Err(SessionError::InvalidKey(_))
        ));
        assert!(session.upload_status().is_none());
    }

    #[tokio::test]
    async fn test_navigation_and_download() {
        let backend = Arc::new(MemoryBackend::default());
        backend.insert("uploads/docs/b.txt", b"b");
        let session = session_with(backend);

        assert_eq!(session.enter("docs").unwrap().as_str(), "uploads/docs/");
        let listing = session.listing().await.unwrap();
        assert_eq!(listing.files[0].name(), "b.txt");
        assert_eq!(session.up().as_str(), "uploads/");
        assert_eq!(session.up().as_str(), "uploads/");

        let url = session.download_url("uploads/docs/b.txt", None).await.unwrap();
        assert!(url.ends_with("ttl=900"));
        let err = session
            .download_url("uploads/missing.txt", Some(300))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Gateway(GatewayError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_nested_folder_created_from_an_empty_folder() {
        let session = session_with(Arc::new(MemoryBackend::default()));
        session.enter("docs").unwrap();
        session.create_folder("2024").await.unwrap();
        session.up();

        let listing = session.listing().await.unwrap();
        let folders: Vec<&str> = listing.folders.iter().map(|f| f.as_str()).collect();
        assert_eq!(folders, vec!["uploads/docs/"]);
        assert!(listing.files.is_empty());
    }

    #[tokio::test]
    async fn test_create_folder_and_delete() {
        let backend = Arc::new(MemoryBackend::default());
        backend.insert("uploads/a.txt", b"a");
        let session = session_with(backend.clone());

        let path = session.create_folder("new").await.unwrap();
        assert_eq!(path.as_str(), "uploads/new/");
        assert!(session.listing().await.unwrap().folders.contains(&path));

        session.delete("uploads/a.txt").await.unwrap();
        assert!(!backend.contains("uploads/a.txt"));
    }
}
