//! High-level client API for the remote object store
//!
//! `ObjectBackend` is the seam every storage adapter implements. The VFS never
//! talks to a backend directly: it goes through [`ObjectClient`], which bounds
//! every call with the mount's remote timeout and logs the transfer.

use async_trait::async_trait;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte stream of an object body.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("no such object: {key}")]
    NotFound { key: String },

    #[error("{op} failed for {key}: {reason}")]
    Transfer {
        op: &'static str,
        key: String,
        reason: String,
    },

    #[error("{op} timed out after {timeout:?}")]
    TimedOut { op: &'static str, timeout: Duration },

    #[error("local io: {0}")]
    Io(#[from] std::io::Error),
}

impl ObjectError {
    pub fn not_found(key: impl Into<String>) -> Self {
        ObjectError::NotFound { key: key.into() }
    }

    pub fn transfer(op: &'static str, key: impl Into<String>, reason: impl Display) -> Self {
        ObjectError::Transfer {
            op,
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ObjectError::NotFound { .. })
    }
}

pub type ObjectResult<T> = Result<T, ObjectError>;

/// One object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub last_modified: Option<SystemTime>,
}

/// Result of `list_objects`.
///
/// In delimited mode `prefixes` holds the full common prefixes (`a/b/`) and
/// `objects` never contains the listed prefix's own marker. In recursive mode
/// `prefixes` is empty and `objects` holds every key under the prefix,
/// markers included.
#[derive(Debug, Clone, Default)]
pub struct ObjectListing {
    pub objects: Vec<ObjectSummary>,
    pub prefixes: Vec<String>,
}

/// Storage adapter contract. Keys are bucket-relative and never start with
/// `/`; a key ending in `/` is a directory marker.
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn get_object(&self, key: &str) -> ObjectResult<ObjectReader>;

    /// Store `data` under `key`, returning the new ETag.
    async fn put_object(&self, key: &str, data: &[u8]) -> ObjectResult<String>;

    /// Deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> ObjectResult<()>;

    async fn copy_object(&self, src: &str, dst: &str) -> ObjectResult<String>;

    async fn list_objects(&self, prefix: &str, recursive: bool) -> ObjectResult<ObjectListing>;
}

pub struct ObjectClient<B: ObjectBackend> {
    backend: B,
    timeout: Duration,
}

impl<B: ObjectBackend> ObjectClient<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            timeout: DEFAULT_REMOTE_TIMEOUT,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T, F>(&self, op: &'static str, key: &str, fut: F) -> ObjectResult<T>
    where
        F: Future<Output = ObjectResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(v)) => {
                debug!(op, key, "remote call ok");
                Ok(v)
            }
            Ok(Err(e)) => {
                if !e.is_not_found() {
                    warn!(op, key, error = %e, "remote call failed");
                }
                Err(e)
            }
            Err(_) => {
                warn!(op, key, timeout = ?self.timeout, "remote call timed out");
                Err(ObjectError::TimedOut {
                    op,
                    timeout: self.timeout,
                })
            }
        }
    }

    pub async fn get_object(&self, key: &str) -> ObjectResult<ObjectReader> {
        self.bounded("get_object", key, self.backend.get_object(key))
            .await
    }

    pub async fn put_object(&self, key: &str, data: &[u8]) -> ObjectResult<String> {
        self.bounded("put_object", key, self.backend.put_object(key, data))
            .await
    }

    pub async fn delete_object(&self, key: &str) -> ObjectResult<()> {
        self.bounded("delete_object", key, self.backend.delete_object(key))
            .await
    }

    pub async fn copy_object(&self, src: &str, dst: &str) -> ObjectResult<String> {
        self.bounded("copy_object", src, self.backend.copy_object(src, dst))
            .await
    }

    pub async fn list_objects(&self, prefix: &str, recursive: bool) -> ObjectResult<ObjectListing> {
        self.bounded(
            "list_objects",
            prefix,
            self.backend.list_objects(prefix, recursive),
        )
        .await
    }
}
