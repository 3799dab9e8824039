//! File node operations: open, handle I/O, flush and release.
//!
//! Open materializes the object into a fresh cache file under the path lock
//! and one write transaction. Handles then work on the cache file only; a
//! dirty handle is published back to the remote on flush or release.

use crate::cadapter::client::{ObjectBackend, ObjectError};
use crate::meta::Tx;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::fs::Vfs;
use crate::vfs::handles::{FileHandle, HandleFlags};
use crate::vfs::node::{FileType, RecordKey};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::SystemTime;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

const COPY_BUF_SIZE: usize = 64 * 1024;

impl<B: ObjectBackend> Vfs<B> {
    /// Open `ino` and return the new handle id.
    ///
    /// With `O_TRUNC` the cache file starts empty and the remote is not
    /// contacted; otherwise the object is streamed into the cache file. On
    /// any failure no handle stays registered and the cache file is removed.
    pub async fn open(&self, ino: u64, flags: u32) -> VfsResult<u64> {
        if self.nodes.kind(ino) == Some(FileType::Dir) {
            return Err(VfsError::IsADirectory {
                path: self.path_of(ino)?,
            });
        }
        let hflags = HandleFlags::from_open_flags(flags);
        let (_guard, path) = self.lock_node(ino).await?;
        let remote = self
            .nodes
            .remote_path(ino)
            .ok_or_else(|| VfsError::not_found(&path))?;
        let key = self
            .nodes
            .record_key(ino)
            .ok_or_else(|| VfsError::not_found(&path))?;

        let mut tx = self.meta.begin(true).await?;
        let cache_path = self.cache.new_path();

        let (size, hash) = match self.fill_cache(&remote, &cache_path, hflags.truncate).await {
            Ok(v) => v,
            Err(e) => {
                self.discard(&cache_path).await;
                return Err(e);
            }
        };
        let file = match self.cache.open(&cache_path, hflags).await {
            Ok(f) => f,
            Err(e) => {
                self.discard(&cache_path).await;
                return Err(e.into());
            }
        };
        // A truncated file differs from the remote until it is uploaded.
        let fh = self
            .handles
            .register(ino, cache_path.clone(), file, hflags, hflags.truncate);

        let committed = match self.persist_open(&mut tx, ino, &key, size, hash) {
            Ok(()) => tx.commit().map_err(VfsError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = committed {
            warn!(ino, fh, error = %e, "open: store commit failed");
            self.handles.remove(fh);
            self.discard(&cache_path).await;
            return Err(e);
        }

        debug!(ino, fh, size, truncate = hflags.truncate, "fuse.open");
        Ok(fh)
    }

    fn persist_open(
        &self,
        tx: &mut Tx,
        ino: u64,
        key: &RecordKey,
        size: u64,
        hash: Vec<u8>,
    ) -> VfsResult<()> {
        let entry = self
            .nodes
            .with_mut(ino, |n| {
                let e = n.attr_mut();
                e.size = size;
                e.hash = hash;
                e.atime = SystemTime::now();
                e.clone()
            })
            .ok_or_else(|| VfsError::not_found(&key.name))?;
        key.open(tx).put(&key.name, &entry)?;
        Ok(())
    }

    /// Create the cache file and, unless truncating, stream the object into
    /// it. Returns the byte count and the sha256 of the content.
    async fn fill_cache(
        &self,
        remote: &str,
        cache_path: &Path,
        truncate: bool,
    ) -> VfsResult<(u64, Vec<u8>)> {
        let mut file = self.cache.create(cache_path).await?;
        if truncate {
            return Ok((0, Sha256::digest(b"").to_vec()));
        }

        let mut body = self.remote.get_object(remote).await?;
        let timeout = self.remote.timeout();
        let copy = async {
            let mut hasher = Sha256::new();
            let mut buf = vec![0u8; COPY_BUF_SIZE];
            let mut total = 0u64;
            loop {
                let n = body.read(&mut buf).await.map_err(|e| {
                    VfsError::TransferFailure(ObjectError::transfer("get_object", remote, e))
                })?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                file.write_all(&buf[..n]).await?;
                total += n as u64;
            }
            file.flush().await?;
            Ok::<_, VfsError>((total, hasher.finalize().to_vec()))
        };
        let (size, hash) = tokio::time::timeout(timeout, copy).await.map_err(|_| {
            VfsError::TransferFailure(ObjectError::TimedOut {
                op: "get_object",
                timeout,
            })
        })??;
        debug!(remote, size, sha256 = %hex::encode(&hash), "object cached");
        Ok((size, hash))
    }

    pub(crate) async fn discard(&self, cache_path: &Path) {
        if let Err(e) = self.cache.remove(cache_path).await {
            warn!(cache = %cache_path.display(), error = %e, "failed to remove cache file");
        }
    }

    pub async fn read(&self, fh: u64, offset: u64, size: u32) -> VfsResult<Vec<u8>> {
        let handle = self.handle(fh)?;
        let mut h = handle.lock().await;
        Ok(h.read_at(offset, size as usize).await?)
    }

    /// Write to the handle's cache file and grow the in-memory size.
    pub async fn write(&self, fh: u64, offset: u64, data: &[u8]) -> VfsResult<u32> {
        let handle = self.handle(fh)?;
        let mut h = handle.lock().await;
        let n = h.write_at(offset, data).await?;
        let end = offset + n as u64;
        self.nodes.with_mut(h.ino, |node| {
            let e = node.attr_mut();
            e.size = e.size.max(end);
            e.mtime = SystemTime::now();
        });
        Ok(n as u32)
    }

    pub async fn flush(&self, fh: u64) -> VfsResult<()> {
        let handle = self.handle(fh)?;
        let mut h = handle.lock().await;
        self.upload(&mut h).await
    }

    pub async fn fsync(&self, fh: u64) -> VfsResult<()> {
        self.flush(fh).await
    }

    /// Close a handle. The handle stays registered until its upload is
    /// done, so the file counts as open meanwhile; afterwards it leaves the
    /// table and its descriptor is closed whatever the upload outcome. The
    /// cache file is removed only when the content reached the remote.
    pub async fn release(&self, fh: u64) -> VfsResult<()> {
        let handle = self.handle(fh)?;
        let mut h = handle.lock().await;
        let uploaded = self.upload(&mut h).await;
        h.close();
        self.handles.remove(fh);
        match uploaded {
            Ok(()) => {
                self.cache.remove(&h.cache_path).await?;
                debug!(
                    fh,
                    ino = h.ino,
                    held_ms = h.opened_at.elapsed().as_millis() as u64,
                    "fuse.release"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    fh,
                    ino = h.ino,
                    cache = %h.cache_path.display(),
                    error = %e,
                    "upload failed on release, cache file kept"
                );
                Err(e)
            }
        }
    }

    /// Publish a dirty handle: upload the cache file to the node's current
    /// remote path under its path lock, then persist etag and size.
    async fn upload(&self, h: &mut FileHandle) -> VfsResult<()> {
        if !h.dirty {
            return Ok(());
        }
        h.sync().await?;
        let ino = h.ino;
        let locked = self.lock_node(ino).await;
        // An unlinked file is detached under its path lock, so the flag is
        // settled once the lock attempt returns.
        if h.is_unlinked() {
            debug!(fh = h.fh, ino, "file unlinked, pending upload dropped");
            h.dirty = false;
            return Ok(());
        }
        let (_guard, path) = locked?;
        let remote = self
            .nodes
            .remote_path(ino)
            .ok_or_else(|| VfsError::not_found(&path))?;
        let key = self
            .nodes
            .record_key(ino)
            .ok_or_else(|| VfsError::not_found(&path))?;

        let data = tokio::fs::read(&h.cache_path).await?;
        let etag = self.remote.put_object(&remote, &data).await?;
        let size = data.len() as u64;
        let hash = Sha256::digest(&data).to_vec();

        self.meta
            .update(|tx| -> VfsResult<()> {
                let entry = self
                    .nodes
                    .with_mut(ino, |n| {
                        let e = n.attr_mut();
                        e.size = size;
                        e.etag = etag;
                        e.hash = hash;
                        e.mtime = SystemTime::now();
                        e.clone()
                    })
                    .ok_or_else(|| VfsError::not_found(&path))?;
                key.open(tx).put(&key.name, &entry)?;
                Ok(())
            })
            .await?;
        h.dirty = false;
        info!(ino, remote, size, "uploaded");
        Ok(())
    }

    /// Truncate or extend a file's content to `size`.
    pub(crate) async fn resize(&self, ino: u64, fh: Option<u64>, size: u64) -> VfsResult<()> {
        let handle = fh
            .and_then(|fh| self.handles.get(fh))
            .or_else(|| self.handles.handles_for(ino).into_iter().next());
        match handle {
            Some(handle) => {
                let mut h = handle.lock().await;
                h.sync().await?;
                self.cache.set_len(&h.cache_path, size).await?;
                h.dirty = true;
            }
            None => {
                let mut flags = libc::O_RDWR;
                if size == 0 {
                    flags |= libc::O_TRUNC;
                }
                let fh = self.open(ino, flags as u32).await?;
                let resized = self.mark_resized(fh, size).await;
                let released = self.release(fh).await;
                resized?;
                released?;
            }
        }
        self.nodes.with_mut(ino, |n| n.attr_mut().size = size);
        Ok(())
    }

    async fn mark_resized(&self, fh: u64, size: u64) -> VfsResult<()> {
        let handle = self.handle(fh)?;
        let mut h = handle.lock().await;
        self.cache.set_len(&h.cache_path, size).await?;
        h.dirty = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cadapter::client::ObjectError;
    use crate::vfs::error::VfsError;
    use crate::vfs::fs::tests::{cache_files, expire_listing, fixture, fixture_with};
    use crate::vfs::node::ROOT_INO;
    use std::sync::Arc;
    use std::time::Duration;

    /// Put an object straight into the remote, bypassing the mount.
    fn seed(f: &crate::vfs::fs::tests::Fixture, key: &str, data: &[u8]) {
        let path = f.remote_dir.path().join(key);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    #[tokio::test]
    async fn test_truncating_open_never_fetches() {
        let f = fixture().await;
        seed(&f, "a.txt", b"previous content");
        let ino = f.vfs.lookup(ROOT_INO, "a.txt").await.unwrap().inode;
        assert_eq!(f.vfs.attr(ino).unwrap().size, 16);

        let fh = f
            .vfs
            .open(ino, (libc::O_WRONLY | libc::O_TRUNC) as u32)
            .await
            .unwrap();
        assert_eq!(f.backend.stats().gets(), 0);
        assert_eq!(f.vfs.attr(ino).unwrap().size, 0);
        f.vfs.release(fh).await.unwrap();
        assert_eq!(f.backend.stats().gets(), 0);
        let remote = std::fs::read(f.remote_dir.path().join("a.txt")).unwrap();
        assert!(remote.is_empty());
    }

    #[tokio::test]
    async fn test_open_downloads_whole_object() {
        let f = fixture().await;
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        seed(&f, "docs/blob.bin", &body);
        let docs = f.vfs.lookup(ROOT_INO, "docs").await.unwrap().inode;
        let ino = f.vfs.lookup(docs, "blob.bin").await.unwrap().inode;

        let fh = f.vfs.open(ino, libc::O_RDONLY as u32).await.unwrap();
        assert_eq!(f.backend.stats().gets(), 1);
        let attr = f.vfs.attr(ino).unwrap();
        assert_eq!(attr.size, body.len() as u64);

        let cache_path = {
            let h = f.vfs.handles().get(fh).unwrap();
            let h = h.lock().await;
            h.cache_path.clone()
        };
        assert_eq!(std::fs::metadata(&cache_path).unwrap().len(), attr.size);

        let data = f.vfs.read(fh, 1000, 10).await.unwrap();
        assert_eq!(data, &body[1000..1010]);
        f.vfs.release(fh).await.unwrap();
        assert_eq!(f.backend.stats().puts(), 0);
    }

    #[tokio::test]
    async fn test_open_missing_object_leaves_nothing_behind() {
        let f = fixture().await;
        seed(&f, "gone.txt", b"x");
        let ino = f.vfs.lookup(ROOT_INO, "gone.txt").await.unwrap().inode;
        std::fs::remove_file(f.remote_dir.path().join("gone.txt")).unwrap();

        let err = f.vfs.open(ino, libc::O_RDONLY as u32).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.errno(), libc::ENOENT);
        assert!(f.vfs.handles().is_empty());
        assert_eq!(cache_files(&f), 0);
        assert!(f.vfs.path_locks().is_empty());
    }

    #[tokio::test]
    async fn test_open_fetch_failure_leaves_nothing_behind() {
        let f = fixture().await;
        seed(&f, "broken.txt", b"x");
        let ino = f.vfs.lookup(ROOT_INO, "broken.txt").await.unwrap().inode;
        f.backend.stats().set_fail_gets(true);

        let err = f.vfs.open(ino, libc::O_RDONLY as u32).await.unwrap_err();
        assert_eq!(err.errno(), libc::EIO);
        assert!(f.vfs.handles().is_empty());
        assert_eq!(cache_files(&f), 0);
        assert!(f.vfs.path_locks().is_empty());
    }

    #[tokio::test]
    async fn test_open_timeout_is_a_transfer_failure() {
        let f = fixture_with(|c| c.remote_timeout(Duration::from_millis(50))).await;
        seed(&f, "slow.txt", b"slow body");
        let ino = f.vfs.lookup(ROOT_INO, "slow.txt").await.unwrap().inode;
        f.backend.stats().set_get_delay(Duration::from_millis(500));

        let err = f.vfs.open(ino, libc::O_RDONLY as u32).await.unwrap_err();
        assert!(matches!(
            err,
            VfsError::TransferFailure(ObjectError::TimedOut { .. })
        ));
        assert_eq!(err.errno(), libc::EIO);
        assert!(f.vfs.handles().is_empty());
        assert_eq!(cache_files(&f), 0);
        assert!(f.vfs.path_locks().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_opens_are_serialized() {
        let f = fixture().await;
        seed(&f, "shared.txt", b"shared body");
        let ino = f.vfs.lookup(ROOT_INO, "shared.txt").await.unwrap().inode;
        let stats = f.backend.stats();
        stats.set_get_delay(Duration::from_millis(50));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let vfs = Arc::clone(&f.vfs);
            tasks.push(tokio::spawn(async move {
                vfs.open(ino, libc::O_RDONLY as u32).await
            }));
        }
        let mut fhs = Vec::new();
        for t in tasks {
            fhs.push(t.await.unwrap().unwrap());
        }
        assert_eq!(stats.gets(), 4);
        assert_eq!(
            stats
                .max_concurrent_gets
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        fhs.sort();
        fhs.dedup();
        assert_eq!(fhs.len(), 4);
        for fh in fhs {
            f.vfs.release(fh).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_release_clean_handle_makes_no_remote_calls() {
        let f = fixture().await;
        seed(&f, "r.txt", b"read only");
        let ino = f.vfs.lookup(ROOT_INO, "r.txt").await.unwrap().inode;
        let fh = f.vfs.open(ino, libc::O_RDONLY as u32).await.unwrap();
        let before = f.backend.stats().remote_calls();
        f.vfs.flush(fh).await.unwrap();
        f.vfs.release(fh).await.unwrap();
        assert_eq!(f.backend.stats().remote_calls(), before);
        assert_eq!(cache_files(&f), 0);
    }

    #[tokio::test]
    async fn test_release_dirty_handle_uploads_once() {
        let f = fixture().await;
        seed(&f, "w.txt", b"0123456789");
        let ino = f.vfs.lookup(ROOT_INO, "w.txt").await.unwrap().inode;
        let fh = f.vfs.open(ino, libc::O_RDWR as u32).await.unwrap();
        f.vfs.write(fh, 8, b"abcdef").await.unwrap();
        assert_eq!(f.vfs.attr(ino).unwrap().size, 14);

        f.vfs.release(fh).await.unwrap();
        assert_eq!(f.backend.stats().puts(), 1);
        let remote = std::fs::read(f.remote_dir.path().join("w.txt")).unwrap();
        assert_eq!(remote, b"01234567abcdef");

        let stored = f
            .vfs
            .meta
            .view(|tx| tx.bucket("/").get("w.txt"))
            .await
            .unwrap();
        assert_eq!(stored.size, 14);
        assert_eq!(stored.etag, format!("\"{:x}\"", md5::compute(b"01234567abcdef")));
        assert!(f.vfs.handles().get(fh).is_none());
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_cache_file() {
        let f = fixture().await;
        let (entry, fh) = f
            .vfs
            .create(ROOT_INO, "lost.txt", 0o644, libc::O_RDWR as u32, 0, 0)
            .await
            .unwrap();
        f.vfs.write(fh, 0, b"precious").await.unwrap();
        let handle = f.vfs.handles().get(fh).unwrap();
        let cache_path = handle.lock().await.cache_path.clone();

        f.backend.stats().set_fail_puts(true);
        let err = f.vfs.release(fh).await.unwrap_err();
        assert_eq!(err.errno(), libc::EIO);

        assert!(f.vfs.handles().get(fh).is_none());
        assert!(!f.vfs.handles().is_open(entry.inode));
        assert!(handle.lock().await.is_closed());
        assert_eq!(std::fs::read(&cache_path).unwrap(), b"precious");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_listing_during_release_keeps_unpublished_file() {
        let f = fixture().await;
        let (entry, fh) = f
            .vfs
            .create(ROOT_INO, "new.txt", 0o644, libc::O_RDWR as u32, 0, 0)
            .await
            .unwrap();
        f.vfs.write(fh, 0, b"fresh").await.unwrap();

        // hold the handle so release stalls before its upload
        let handle = f.vfs.handles().get(fh).unwrap();
        let held = handle.lock().await;
        let vfs = Arc::clone(&f.vfs);
        let release = tokio::spawn(async move { vfs.release(fh).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        expire_listing(&f, ROOT_INO);
        f.vfs.readdir(ROOT_INO).await.unwrap();
        assert_eq!(f.vfs.nodes().child(ROOT_INO, "new.txt"), Some(entry.inode));
        drop(held);

        release.await.unwrap().unwrap();
        assert_eq!(
            std::fs::read(f.remote_dir.path().join("new.txt")).unwrap(),
            b"fresh"
        );
        assert!(f.vfs.handles().is_empty());
        let stored = f
            .vfs
            .meta
            .view(|tx| tx.bucket("/").get("new.txt"))
            .await
            .unwrap();
        assert_eq!(stored.size, 5);
    }

    #[tokio::test]
    async fn test_release_after_unlink_drops_content() {
        let f = fixture().await;
        let (_, fh) = f
            .vfs
            .create(ROOT_INO, "tmp.txt", 0o644, libc::O_RDWR as u32, 0, 0)
            .await
            .unwrap();
        f.vfs.write(fh, 0, b"scratch").await.unwrap();
        f.vfs.unlink(ROOT_INO, "tmp.txt").await.unwrap();

        f.vfs.release(fh).await.unwrap();
        assert_eq!(f.backend.stats().puts(), 0);
        assert!(!f.remote_dir.path().join("tmp.txt").exists());
        assert!(f.vfs.handles().is_empty());
        assert_eq!(cache_files(&f), 0);
    }

    #[tokio::test]
    async fn test_release_of_vanished_node_reports_error() {
        let f = fixture().await;
        let (_, fh) = f
            .vfs
            .create(ROOT_INO, "orphan.txt", 0o644, libc::O_RDWR as u32, 0, 0)
            .await
            .unwrap();
        f.vfs.write(fh, 0, b"keep me").await.unwrap();
        // dropped from memory without an unlink
        f.vfs.nodes().detach(ROOT_INO, "orphan.txt");

        let err = f.vfs.release(fh).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(f.vfs.handles().is_empty());
        assert_eq!(cache_files(&f), 1);
    }

    #[tokio::test]
    async fn test_bad_handle() {
        let f = fixture().await;
        let err = f.vfs.read(999, 0, 1).await.unwrap_err();
        assert_eq!(err.errno(), libc::EBADF);
        assert!(f.vfs.release(999).await.is_err());
    }
}
