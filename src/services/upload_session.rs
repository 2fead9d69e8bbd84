//! Progress and outcome of one user-initiated upload.

use crate::models::ObjectKey;
use crate::services::gateway::{GatewayResult, StorageGateway};
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    InProgress { percent: u8 },
    Succeeded,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSession {
    target_key: ObjectKey,
    size_bytes: u64,
    status: UploadStatus,
    last_percent: u8,
}

impl UploadSession {
    pub fn new(target_key: ObjectKey, size_bytes: u64) -> Self {
        Self {
            target_key,
            size_bytes,
            status: UploadStatus::Pending,
            last_percent: 0,
        }
    }

    pub fn target_key(&self) -> &ObjectKey {
        &self.target_key
    }

    pub fn status(&self) -> &UploadStatus {
        &self.status
    }

    /// Highest percentage reported so far.
    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            UploadStatus::Succeeded | UploadStatus::Failed { .. }
        )
    }

    /// Record a progress report. Ignored once terminal; never lowers the
    /// percentage.
    pub fn advance(&mut self, percent: u8) {
        if self.is_terminal() {
            return;
        }
        self.last_percent = self.last_percent.max(percent.min(100));
        self.status = UploadStatus::InProgress {
            percent: self.last_percent,
        };
    }

    /// Settle the session from the put result. The first settlement wins.
    pub fn finish<T>(&mut self, result: &GatewayResult<T>) {
        match result {
            Ok(_) if !self.is_terminal() => self.status = UploadStatus::Succeeded,
            Ok(_) => {}
            Err(err) => self.fail(err.to_string()),
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        if !self.is_terminal() {
            self.status = UploadStatus::Failed {
                reason: reason.into(),
            };
        }
    }
}

/// Run the session published on `session` to completion, pushing every
/// transition through the channel.
pub async fn drive_upload(
    gateway: &StorageGateway,
    session: &watch::Sender<Option<UploadSession>>,
    payload: Bytes,
) -> GatewayResult<()> {
    let key = {
        let current = session.borrow();
        match current.as_ref() {
            Some(upload) => upload.target_key().clone(),
            None => return Ok(()),
        }
    };

    let on_progress = |percent: u8| {
        session.send_modify(|current| {
            if let Some(upload) = current {
                upload.advance(percent);
            }
        });
    };
    let result = gateway.put(&key, payload, &on_progress).await;

    session.send_modify(|current| {
        if let Some(upload) = current {
            upload.finish(&result);
        }
    });
    if result.is_ok() {
        info!("uploaded {}", key);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::gateway::{FailureKind, GatewayError};
    use crate::services::testing::MemoryBackend;
    use std::sync::Arc;

    fn key() -> ObjectKey {
        ObjectKey::parse("uploads/a.txt").unwrap()
    }

    #[test]
    fn test_state_machine() {
        let mut session = UploadSession::new(key(), 3);
        assert_eq!(session.status(), &UploadStatus::Pending);
        session.advance(40);
        session.advance(20);
        assert_eq!(session.status(), &UploadStatus::InProgress { percent: 40 });
        session.finish::<()>(&Err(GatewayError::Network("reset".into())));
        assert!(matches!(session.status(), UploadStatus::Failed { .. }));
        session.finish(&Ok(()));
        session.advance(90);
        assert!(matches!(session.status(), UploadStatus::Failed { .. }));
        assert_eq!(session.last_percent(), 40);
    }

    #[tokio::test]
    async fn test_successful_upload_reports_progress() {
        let backend = Arc::new(MemoryBackend::default());
        backend.script_progress(vec![33, 66, 100]);
        let gateway = StorageGateway::new(backend.clone());
        let (tx, mut rx) = watch::channel(Some(UploadSession::new(key(), 3)));

        drive_upload(&gateway, &tx, Bytes::from_static(b"abc"))
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        let done = rx.borrow_and_update().clone().unwrap();
        assert_eq!(done.status(), &UploadStatus::Succeeded);
        assert_eq!(done.last_percent(), 100);
        assert_eq!(backend.get("uploads/a.txt").unwrap(), Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_reason() {
        let backend = Arc::new(MemoryBackend::default());
        backend.script_progress(vec![50]);
        backend.fail_next_put(GatewayError::Unauthorized("guest".into()));
        let gateway = StorageGateway::new(backend);
        let (tx, rx) = watch::channel(Some(UploadSession::new(key(), 3)));

        let err = drive_upload(&gateway, &tx, Bytes::from_static(b"abc"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Unauthorized);

        let done = rx.borrow().clone().unwrap();
        assert_eq!(done.last_percent(), 50);
        match done.status() {
            UploadStatus::Failed { reason } => assert!(reason.contains("guest")),
            other => panic!("unexpected status {other:?}"),
        }
    }
}
