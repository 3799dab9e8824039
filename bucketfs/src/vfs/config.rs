use crate::cadapter::client::DEFAULT_REMOTE_TIMEOUT;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CACHE_MODE: u32 = 0o600;
pub const DEFAULT_DIR_MODE: u32 = 0o755;
pub const DEFAULT_FILE_MODE: u32 = 0o644;
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct VfsConfig {
    /// Root of the mount's local state: content blobs under `cache/`, the
    /// metadata store at `meta.db` unless `db_path` is set.
    pub cache_dir: PathBuf,
    pub db_path: Option<PathBuf>,
    /// Permission bits of cache files.
    pub cache_mode: u32,

    /// Ownership and permissions given to entries discovered remotely.
    pub uid: u32,
    pub gid: u32,
    pub dir_mode: u32,
    pub file_mode: u32,

    /// Upper bound for every remote call, and for a whole download.
    pub remote_timeout: Duration,
    /// How long a directory listing is trusted before the remote is listed again.
    pub listing_ttl: Duration,
    /// TTL handed to the kernel for entries and attributes.
    pub attr_ttl: Duration,
}

impl Default for VfsConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("bucketfs");
        Self {
            cache_dir,
            db_path: None,
            cache_mode: DEFAULT_CACHE_MODE,
            uid: 0,
            gid: 0,
            dir_mode: DEFAULT_DIR_MODE,
            file_mode: DEFAULT_FILE_MODE,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            listing_ttl: DEFAULT_LISTING_TTL,
            attr_ttl: DEFAULT_ATTR_TTL,
        }
    }
}

impl VfsConfig {
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn db_path(self, db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: Some(db_path.as_ref().to_path_buf()),
            ..self
        }
    }

    pub fn owner(self, uid: u32, gid: u32) -> Self {
        Self { uid, gid, ..self }
    }

    pub fn remote_timeout(self, remote_timeout: Duration) -> Self {
        Self {
            remote_timeout,
            ..self
        }
    }

    pub fn listing_ttl(self, listing_ttl: Duration) -> Self {
        Self {
            listing_ttl,
            ..self
        }
    }

    pub fn attr_ttl(self, attr_ttl: Duration) -> Self {
        Self { attr_ttl, ..self }
    }

    pub fn store_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.cache_dir.join("meta.db"))
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.cache_dir.join("cache")
    }
}
