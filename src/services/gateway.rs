//! StorageGateway: the facade every caller goes through to reach a backend.
//!
//! A backend exposes a handful of primitives (put with progress, paged
//! prefix listing, presigned URL issuance, delete). The gateway turns them
//! into the caller-facing contract: full listings, tagged failures,
//! monotonic progress. It never retries.

use crate::models::{DirectoryListing, DirectoryPath, ObjectKey, RawEntry};
use crate::services::path_model::derive_listing;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use thiserror::Error;
use tracing::{debug, warn};

/// Receives upload progress as a whole percentage.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Unauthorized,
    QuotaExceeded,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("storage backend unreachable: {0}")]
    Network(String),
    #[error("not authorized: {0}")]
    Unauthorized(String),
    #[error("storage quota exceeded: {used} of {limit} bytes in use")]
    QuotaExceeded { used: u64, limit: u64 },
    #[error("object `{0}` not found, the listing may be stale")]
    NotFound(String),
}

impl GatewayError {
    pub fn kind(&self) -> FailureKind {
        match self {
            GatewayError::Network(_) => FailureKind::Network,
            GatewayError::Unauthorized(_) => FailureKind::Unauthorized,
            GatewayError::QuotaExceeded { .. } => FailureKind::QuotaExceeded,
            GatewayError::NotFound(_) => FailureKind::NotFound,
        }
    }

    /// Only transport failures are worth retrying, and only by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Network(_))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<RawEntry>,
    pub next_continuation_token: Option<String>,
}

/// The primitives a storage service must offer.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Create or overwrite the object at `key`.
    async fn put(&self, key: &ObjectKey, payload: Bytes, on_progress: ProgressFn<'_>)
    -> GatewayResult<()>;

    /// List records whose key starts with `prefix`, one page at a time.
    async fn list_page(
        &self,
        prefix: &DirectoryPath,
        continuation_token: Option<String>,
    ) -> GatewayResult<ListPage>;

    /// Issue a credential-free URL for `key`, valid for `ttl_seconds`.
    async fn presign_get(&self, key: &ObjectKey, ttl_seconds: u64) -> GatewayResult<String>;

    async fn delete(&self, key: &ObjectKey) -> GatewayResult<()>;
}

/// Cheap to clone; all clones share the backend.
#[derive(Clone)]
pub struct StorageGateway {
    backend: Arc<dyn StorageBackend>,
}

impl StorageGateway {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Upload `payload` to `key`. Progress reaches the callback clamped to
    /// 0..=100 and never decreasing; the result alone decides the outcome.
    pub async fn put(
        &self,
        key: &ObjectKey,
        payload: Bytes,
        on_progress: ProgressFn<'_>,
    ) -> GatewayResult<()> {
        debug!("put {} ({} bytes)", key, payload.len());
        let high_water = AtomicU8::new(0);
        let monotonic = |percent: u8| {
            let percent = percent.min(100);
            let previous = high_water.fetch_max(percent, Ordering::AcqRel);
            if percent >= previous {
                on_progress(percent);
            }
        };
        let result = self.backend.put(key, payload, &monotonic).await;
        if let Err(err) = &result {
            warn!("put {} failed: {}", key, err);
        }
        result
    }

    /// Every record under `prefix`, across all backend pages.
    ///
    /// A prefix the backend has never heard of is an empty folder, not an
    /// error. Losing the listing after the first page is an error.
    pub async fn list(&self, prefix: &DirectoryPath) -> GatewayResult<Vec<RawEntry>> {
        let mut entries = Vec::new();
        let mut token = None;
        let mut pages = 0usize;
        loop {
            let page = match self.backend.list_page(prefix, token.take()).await {
                Ok(page) => page,
                Err(GatewayError::NotFound(_)) if pages == 0 => break,
                Err(err) => {
                    warn!("list {} failed: {}", prefix, err);
                    return Err(err);
                }
            };
            pages += 1;
            entries.extend(page.entries);
            match page.next_continuation_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!("listed {} entries under {} in {} page(s)", entries.len(), prefix, pages);
        Ok(entries)
    }

    /// `list` folded into one level of the virtual hierarchy.
    pub async fn list_directory(&self, prefix: &DirectoryPath) -> GatewayResult<DirectoryListing> {
        let raw = self.list(prefix).await?;
        Ok(derive_listing(&raw, prefix))
    }

    /// A presigned download URL. `ttl_seconds` bounds the URL, not this call.
    pub async fn get_download_url(&self, key: &ObjectKey, ttl_seconds: u64) -> GatewayResult<String> {
        let result = self.backend.presign_get(key, ttl_seconds).await;
        if let Err(err) = &result {
            warn!("presign {} failed: {}", key, err);
        }
        result
    }

    pub async fn delete(&self, key: &ObjectKey) -> GatewayResult<()> {
        let result = self.backend.delete(key).await;
        if let Err(err) = &result {
            warn!("delete {} failed: {}", key, err);
        }
        result
    }

    /// Write an empty placeholder so an otherwise empty folder shows up in
    /// listings.
    pub async fn create_folder(&self, path: &DirectoryPath) -> GatewayResult<()> {
        self.put(&path.as_key(), Bytes::new(), &|_| {}).await
    }
}
