//! Instrumented backend for unit tests: counts calls per operation, can fail
//! transfers on demand and slow downloads and listings down to widen race
//! windows.

use crate::cadapter::client::{
    ObjectBackend, ObjectError, ObjectListing, ObjectReader, ObjectResult,
};
use crate::cadapter::localfs::LocalFsBackend;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct CallStats {
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub deletes: AtomicUsize,
    pub copies: AtomicUsize,
    pub lists: AtomicUsize,
    /// Highest number of gets observed in flight for a single key.
    pub max_concurrent_gets: AtomicUsize,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    list_delay_ms: AtomicUsize,
    get_delay_ms: AtomicUsize,
    in_flight: Mutex<HashMap<String, usize>>,
}

impl CallStats {
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn remote_calls(&self) -> usize {
        self.gets()
            + self.puts()
            + self.deletes.load(Ordering::SeqCst)
            + self.copies.load(Ordering::SeqCst)
            + self.lists.load(Ordering::SeqCst)
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.list_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_get_delay(&self, delay: Duration) {
        self.get_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    fn enter_get(&self, key: &str) {
        let mut map = self.in_flight.lock();
        let n = map.entry(key.to_string()).or_default();
        *n += 1;
        self.max_concurrent_gets.fetch_max(*n, Ordering::SeqCst);
    }

    fn leave_get(&self, key: &str) {
        let mut map = self.in_flight.lock();
        if let Some(n) = map.get_mut(key) {
            *n -= 1;
            if *n == 0 {
                map.remove(key);
            }
        }
    }
}

#[derive(Clone)]
pub struct RecordingBackend {
    inner: Arc<LocalFsBackend>,
    stats: Arc<CallStats>,
}

impl RecordingBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            inner: Arc::new(LocalFsBackend::new(root)),
            stats: Arc::new(CallStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<CallStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl ObjectBackend for RecordingBackend {
    async fn get_object(&self, key: &str) -> ObjectResult<ObjectReader> {
        self.stats.gets.fetch_add(1, Ordering::SeqCst);
        if self.stats.fail_gets.load(Ordering::SeqCst) {
            return Err(ObjectError::transfer("get_object", key, "injected failure"));
        }
        self.stats.enter_get(key);
        let delay = self.stats.get_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let res = self.inner.get_object(key).await;
        self.stats.leave_get(key);
        res
    }

    async fn put_object(&self, key: &str, data: &[u8]) -> ObjectResult<String> {
        self.stats.puts.fetch_add(1, Ordering::SeqCst);
        if self.stats.fail_puts.load(Ordering::SeqCst) {
            return Err(ObjectError::transfer("put_object", key, "injected failure"));
        }
        self.inner.put_object(key, data).await
    }

    async fn delete_object(&self, key: &str) -> ObjectResult<()> {
        self.stats.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_object(key).await
    }

    async fn copy_object(&self, src: &str, dst: &str) -> ObjectResult<String> {
        self.stats.copies.fetch_add(1, Ordering::SeqCst);
        self.inner.copy_object(src, dst).await
    }

    async fn list_objects(&self, prefix: &str, recursive: bool) -> ObjectResult<ObjectListing> {
        self.stats.lists.fetch_add(1, Ordering::SeqCst);
        let delay = self.stats.list_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.inner.list_objects(prefix, recursive).await
    }
}
