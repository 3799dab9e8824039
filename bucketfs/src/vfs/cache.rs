//! Local cache area: content blobs of opened files, each under a freshly
//! generated name that has nothing to do with the object key.

use crate::vfs::handles::HandleFlags;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};

pub struct CacheArea {
    root: PathBuf,
    mode: u32,
}

impl CacheArea {
    pub async fn new(root: impl AsRef<Path>, mode: u32) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root, mode })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A path no other cache file uses.
    pub fn new_path(&self) -> PathBuf {
        self.root.join(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Create an empty cache file at `path`, open for reading and writing.
    pub async fn create(&self, path: &Path) -> io::Result<File> {
        let mut opts = OpenOptions::new();
        opts.read(true).write(true).create_new(true);
        #[cfg(unix)]
        opts.mode(self.mode);
        opts.open(path).await
    }

    /// Reopen an existing cache file with the access mode of an open request.
    pub async fn open(&self, path: &Path, flags: HandleFlags) -> io::Result<File> {
        OpenOptions::new()
            .read(flags.read)
            .write(flags.write)
            .open(path)
            .await
    }

    /// Missing files are not an error.
    pub async fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Resize a cache file regardless of the access mode its handle was opened with.
    pub async fn set_len(&self, path: &Path, size: u64) -> io::Result<()> {
        let f = OpenOptions::new().write(true).open(path).await?;
        f.set_len(size).await
    }
}
