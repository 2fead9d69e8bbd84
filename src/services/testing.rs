//! In-memory backend for unit tests: scripted pages, failures and progress.

use crate::models::{DirectoryPath, ObjectKey, RawEntry};
use crate::services::gateway::{GatewayError, GatewayResult, ListPage, ProgressFn, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Parks calls of one kind until released.
#[derive(Default)]
struct Gate {
    closed: AtomicBool,
    opened: Notify,
}

impl Gate {
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn open(&self) {
        self.closed.store(false, Ordering::SeqCst);
        self.opened.notify_waiters();
    }

    async fn pass(&self) {
        if self.closed.load(Ordering::SeqCst) {
            self.opened.notified().await;
        }
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, Bytes>>,
    page_size: Option<usize>,
    progress_script: Mutex<Option<Vec<u8>>>,
    put_failure: Mutex<Option<GatewayError>>,
    /// Fails the list call with this index (0-based).
    list_failure: Mutex<Option<(usize, GatewayError)>>,
    put_gate: Gate,
    list_gate: Gate,
    list_calls: AtomicUsize,
    presign_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: Some(page_size),
            ..Self::default()
        }
    }

    pub fn insert(&self, key: &str, payload: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), Bytes::copy_from_slice(payload));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn script_progress(&self, steps: Vec<u8>) {
        *self.progress_script.lock().unwrap() = Some(steps);
    }

    pub fn fail_next_put(&self, err: GatewayError) {
        *self.put_failure.lock().unwrap() = Some(err);
    }

    pub fn fail_next_list(&self, err: GatewayError) {
        self.fail_list_call(self.list_calls(), err);
    }

    pub fn fail_list_call(&self, call: usize, err: GatewayError) {
        *self.list_failure.lock().unwrap() = Some((call, err));
    }

    /// Park every put until [`release_puts`](Self::release_puts).
    pub fn hold_puts(&self) {
        self.put_gate.close();
    }

    pub fn release_puts(&self) {
        self.put_gate.open();
    }

    /// Park every list call until [`release_lists`](Self::release_lists).
    pub fn hold_lists(&self) {
        self.list_gate.close();
    }

    pub fn release_lists(&self) {
        self.list_gate.open();
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn presign_calls(&self) -> usize {
        self.presign_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(
        &self,
        key: &ObjectKey,
        payload: Bytes,
        on_progress: ProgressFn<'_>,
    ) -> GatewayResult<()> {
        self.put_gate.pass().await;
        let steps = self
            .progress_script
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| vec![100]);
        for step in steps {
            on_progress(step);
        }
        if let Some(err) = self.put_failure.lock().unwrap().take() {
            return Err(err);
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), payload);
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &DirectoryPath,
        continuation_token: Option<String>,
    ) -> GatewayResult<ListPage> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.list_gate.pass().await;
        {
            let mut failure = self.list_failure.lock().unwrap();
            if failure.as_ref().is_some_and(|(at, _)| *at == call) {
                if let Some((_, err)) = failure.take() {
                    return Err(err);
                }
            }
        }
        let objects = self.objects.lock().unwrap();
        let mut matching = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix.as_str()))
            .filter(|(key, _)| continuation_token.as_deref().is_none_or(|after| key.as_str() > after))
            .map(|(key, payload)| {
                if key.ends_with('/') {
                    RawEntry::marker(key.clone())
                } else {
                    RawEntry::file(key.clone(), payload.len() as u64)
                }
            });

        let limit = self.page_size.unwrap_or(usize::MAX);
        let entries: Vec<RawEntry> = matching.by_ref().take(limit).collect();
        let next_continuation_token = match matching.next() {
            Some(_) => entries.last().map(|entry| entry.key.clone()),
            None => None,
        };
        Ok(ListPage {
            entries,
            next_continuation_token,
        })
    }

    async fn presign_get(&self, key: &ObjectKey, ttl_seconds: u64) -> GatewayResult<String> {
        self.presign_calls.fetch_add(1, Ordering::SeqCst);
        if !self.contains(key.as_str()) {
            return Err(GatewayError::NotFound(key.to_string()));
        }
        Ok(format!("memory://{}?ttl={}", key, ttl_seconds))
    }

    async fn delete(&self, key: &ObjectKey) -> GatewayResult<()> {
        match self.objects.lock().unwrap().remove(key.as_str()) {
            Some(_) => Ok(()),
            None => Err(GatewayError::NotFound(key.to_string())),
        }
    }
}
