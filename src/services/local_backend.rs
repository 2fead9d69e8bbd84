//! src/services/local_backend.rs
//!
//! Self-hosted storage backend: SQLite for object metadata,
//! local disk for payloads sharded beneath `base_path/{shard}/{shard}/{md5}`,
//! HMAC-signed presigned download URLs, an access policy and an optional
//! byte quota. It implements [`StorageBackend`], so the gateway cannot tell
//! it apart from a hosted service.

use crate::models::{
    AccessPolicy, Action, DirectoryPath, ObjectKey, Principal, RawEntry, object::StoredObject,
};
use crate::services::gateway::{GatewayError, GatewayResult, ListPage, ProgressFn, StorageBackend};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use md5::Context;
use sha2::Sha256;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const WRITE_CHUNK_SIZE: usize = 64 * 1024;
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("{principal:?} may not {action:?} `{key}`")]
    AccessDenied {
        principal: Principal,
        action: Action,
        key: String,
    },
    #[error("quota exceeded: {used} of {limit} bytes in use")]
    QuotaExceeded { used: u64, limit: u64 },
    #[error("download link signature is invalid")]
    BadSignature,
    #[error("download link expired")]
    LinkExpired,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ObjectNotFound(key) => GatewayError::NotFound(key),
            StorageError::QuotaExceeded { used, limit } => {
                GatewayError::QuotaExceeded { used, limit }
            }
            err @ (StorageError::AccessDenied { .. }
            | StorageError::BadSignature
            | StorageError::LinkExpired) => GatewayError::Unauthorized(err.to_string()),
            err @ (StorageError::Sqlx(_) | StorageError::Io(_)) => {
                GatewayError::Network(err.to_string())
            }
        }
    }
}

/// Tunables for [`LocalBackend`].
#[derive(Debug, Clone)]
pub struct LocalBackendOptions {
    /// Base URL presigned links point at, e.g. `http://127.0.0.1:3000`.
    pub public_url: String,
    /// Secret for the HMAC over presigned links.
    pub signing_secret: String,
    /// Upper bound on the total size of live objects.
    pub quota_bytes: Option<u64>,
    /// Listing page size, clamped to 1..=1000.
    pub page_size: usize,
    pub policy: AccessPolicy,
    /// The caller every request is made on behalf of.
    pub principal: Principal,
}

#[derive(Clone)]
pub struct LocalBackend {
    /// Shared SQLite connection pool used for metadata operations.
    db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    base_path: PathBuf,

    options: Arc<LocalBackendOptions>,
}

impl LocalBackend {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>, options: LocalBackendOptions) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            options: Arc::new(options),
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn authorize(&self, action: Action, key: &str) -> StorageResult<()> {
        let principal = &self.options.principal;
        if self.options.policy.allows(principal, action, key) {
            Ok(())
        } else {
            Err(StorageError::AccessDenied {
                principal: principal.clone(),
                action,
                key: key.to_string(),
            })
        }
    }

    /// Payload location: two md5 shard levels, then the full md5 of the key.
    /// Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let digest = md5::compute(key);
        let mut path = self.base_path.clone();
        path.push(format!("{:02x}", digest[0]));
        path.push(format!("{:02x}", digest[1]));
        path.push(format!("{:x}", digest));
        path
    }

    /// Fetch a non-deleted object metadata record.
    async fn fetch_object(&self, key: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT id, key, filename, content_type, size_bytes, etag, last_modified, is_deleted
             FROM objects
             WHERE key = ? AND is_deleted = 0",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound(key.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Bytes held by live objects, not counting `excluding` (the object
    /// about to be overwritten).
    async fn used_bytes(&self, excluding: &str) -> StorageResult<u64> {
        let used: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM objects WHERE is_deleted = 0 AND key != ?",
        )
        .bind(excluding)
        .fetch_one(&*self.db)
        .await?;
        Ok(used.max(0) as u64)
    }

    async fn ensure_quota(&self, key: &str, incoming: u64) -> StorageResult<()> {
        let Some(limit) = self.options.quota_bytes else {
            return Ok(());
        };
        let used = self.used_bytes(key).await?;
        if used.saturating_add(incoming) > limit {
            return Err(StorageError::QuotaExceeded { used, limit });
        }
        Ok(())
    }

    /// Write `payload` to disk in chunks, reporting progress after each one.
    ///
    /// - Writes to a temporary file next to the final location.
    /// - Computes the MD5 etag while writing.
    /// - fsyncs, then atomically renames into place.
    ///
    /// Cleans up the temp file on errors.
    async fn write_payload(
        &self,
        key: &str,
        payload: &Bytes,
        on_progress: ProgressFn<'_>,
    ) -> StorageResult<(PathBuf, String)> {
        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let total = payload.len();
        let mut written = 0usize;
        let mut digest = Context::new();
        for chunk in payload.chunks(WRITE_CHUNK_SIZE) {
            digest.consume(chunk);
            if let Err(err) = file.write_all(chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
            written += chunk.len();
            on_progress((written * 100 / total) as u8);
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        Ok((file_path, format!("{:x}", digest.compute())))
    }

    /// Store an object and upsert its metadata (overwrite semantics).
    ///
    /// Folder markers (keys ending in `/`) get a metadata row only.
    pub async fn put_object(
        &self,
        key: &ObjectKey,
        payload: Bytes,
        on_progress: ProgressFn<'_>,
    ) -> StorageResult<StoredObject> {
        self.authorize(Action::Write, key.as_str())?;
        // markers never store a payload
        let size_bytes = if key.is_folder_marker() { 0 } else { payload.len() };
        self.ensure_quota(key.as_str(), size_bytes as u64).await?;

        let written = if key.is_folder_marker() || payload.is_empty() {
            None
        } else {
            Some(self.write_payload(key.as_str(), &payload, on_progress).await?)
        };
        if payload.is_empty() && !key.is_folder_marker() {
            // an empty file still needs a payload on disk to be downloadable
            let file_path = self.object_path(key.as_str());
            if let Some(parent) = file_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&file_path, b"").await?;
        }
        on_progress(100);

        let etag = written
            .as_ref()
            .map(|(_, etag)| etag.clone())
            .unwrap_or_else(|| format!("{:x}", md5::compute(b"")));
        let filename = key.basename().to_string();
        let content_type = if key.is_folder_marker() {
            None
        } else {
            mime_guess::from_path(&filename)
                .first()
                .map(|mime| mime.essence_str().to_string())
        };

        let insert_result = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (
                id, key, filename, content_type, size_bytes, etag, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(key) DO UPDATE SET
                filename = excluded.filename,
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING id, key, filename, content_type, size_bytes, etag, last_modified, is_deleted
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key.as_str())
        .bind(&filename)
        .bind(content_type)
        .bind(size_bytes as i64)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match insert_result {
            Ok(obj) => Ok(obj),
            Err(err) => {
                if let Some((file_path, _)) = written {
                    let _ = fs::remove_file(&file_path).await;
                }
                Err(StorageError::Sqlx(err))
            }
        }
    }

    /// One page of live objects under `prefix`, in key order.
    ///
    /// Fetches one row past the page to know whether another page follows;
    /// the continuation token is the last key returned.
    pub async fn list_objects(
        &self,
        prefix: &DirectoryPath,
        continuation_token: Option<&str>,
    ) -> StorageResult<(Vec<StoredObject>, Option<String>)> {
        self.authorize(Action::Read, prefix.as_str())?;
        let page_size = self.options.page_size.clamp(1, MAX_PAGE_SIZE);

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, key, filename, content_type, size_bytes, etag, last_modified, is_deleted \
             FROM objects WHERE is_deleted = 0 AND key LIKE ",
        );
        builder.push_bind(format!("{}%", escape_like(prefix.as_str())));
        builder.push(" ESCAPE '\\'");
        if let Some(token) = continuation_token {
            builder.push(" AND key > ");
            builder.push_bind(token.to_string());
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind((page_size + 1) as i64);

        let mut rows: Vec<StoredObject> = builder.build_query_as().fetch_all(&*self.db).await?;

        let next = if rows.len() > page_size {
            rows.truncate(page_size);
            rows.last().map(|obj| obj.key.clone())
        } else {
            None
        };
        Ok((rows, next))
    }

    /// Build a presigned URL for an existing object.
    pub async fn presign(&self, key: &ObjectKey, ttl_seconds: u64) -> StorageResult<String> {
        self.authorize(Action::Read, key.as_str())?;
        self.fetch_object(key.as_str()).await?;

        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        let expires = Utc::now().timestamp().saturating_add(ttl);
        let signature = self.sign(key.as_str(), expires);
        let encoded_key = key
            .as_str()
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Ok(format!(
            "{}/download/{}?expires={}&signature={}",
            self.options.public_url.trim_end_matches('/'),
            encoded_key,
            expires,
            signature
        ))
    }

    fn mac_for(&self, key: &str, expires: i64) -> HmacSha256 {
        let mut mac = match HmacSha256::new_from_slice(self.options.signing_secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        };
        mac.update(key.as_bytes());
        mac.update(b"\n");
        mac.update(expires.to_string().as_bytes());
        mac
    }

    fn sign(&self, key: &str, expires: i64) -> String {
        URL_SAFE_NO_PAD.encode(self.mac_for(key, expires).finalize().into_bytes())
    }

    /// Check a presigned link against the clock reading `now`.
    pub fn verify_link(&self, key: &str, expires: i64, signature: &str, now: i64) -> StorageResult<()> {
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StorageError::BadSignature)?;
        self.mac_for(key, expires)
            .verify_slice(&provided)
            .map_err(|_| StorageError::BadSignature)?;
        if now > expires {
            return Err(StorageError::LinkExpired);
        }
        Ok(())
    }

    /// Resolve a presigned link to the object and an open payload handle.
    ///
    /// Needs no principal: the signature is the credential.
    pub async fn open_presigned(
        &self,
        key: &str,
        expires: i64,
        signature: &str,
    ) -> StorageResult<(StoredObject, File)> {
        self.verify_link(key, expires, signature, Utc::now().timestamp())?;
        let object = self.fetch_object(key).await?;

        let file_path = self.object_path(key);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Soft-delete an object and attempt to remove its payload.
    ///
    /// - Sets `is_deleted = 1`
    /// - Deletes the payload file best-effort
    /// - Prunes emptied shard directories
    pub async fn delete_object(&self, key: &ObjectKey) -> StorageResult<StoredObject> {
        self.authorize(Action::Delete, key.as_str())?;
        let object = self.fetch_object(key.as_str()).await?;

        let result = sqlx::query("UPDATE objects SET is_deleted = 1 WHERE key = ? AND is_deleted = 0")
            .bind(key.as_str())
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ObjectNotFound(key.to_string()));
        }

        if object.is_folder_marker() {
            return Ok(object);
        }

        let file_path = self.object_path(key.as_str());
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }

        Ok(object)
    }

    /// Remove empty directories from `start` upwards, stopping below `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn put(
        &self,
        key: &ObjectKey,
        payload: Bytes,
        on_progress: ProgressFn<'_>,
    ) -> GatewayResult<()> {
        self.put_object(key, payload, on_progress).await?;
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &DirectoryPath,
        continuation_token: Option<String>,
    ) -> GatewayResult<ListPage> {
        let (rows, next_continuation_token) =
            self.list_objects(prefix, continuation_token.as_deref()).await?;
        let entries = rows
            .into_iter()
            .map(|obj| {
                if obj.is_folder_marker() {
                    RawEntry::marker(obj.key)
                } else {
                    RawEntry::file(obj.key, obj.size_bytes.max(0) as u64)
                }
            })
            .collect();
        Ok(ListPage {
            entries,
            next_continuation_token,
        })
    }

    async fn presign_get(&self, key: &ObjectKey, ttl_seconds: u64) -> GatewayResult<String> {
        Ok(self.presign(key, ttl_seconds).await?)
    }

    async fn delete(&self, key: &ObjectKey) -> GatewayResult<()> {
        self.delete_object(key).await?;
        Ok(())
    }
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
