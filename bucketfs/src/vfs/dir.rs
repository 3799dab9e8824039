//! Directory node operations: child resolution, listing, create, mkdir,
//! remove and rename.
//!
//! A directory's children are served from memory while its last remote
//! listing is younger than the listing TTL. Past that, the stored namespace
//! and a fresh delimited listing are merged: the listing decides which names
//! exist, stored records keep the attributes the remote cannot carry.

use crate::cadapter::client::{ObjectBackend, ObjectListing};
use crate::meta::{Entry, MetaResult};
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::fs::{Vfs, check_name, join_path};
use crate::vfs::handles::HandleFlags;
use crate::vfs::node::{DirEntry, DirNode, FileType, Node};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{debug, info, warn};

impl<B: ObjectBackend> Vfs<B> {
    /// Resolve `name` under `parent` and count a kernel reference to it.
    pub async fn lookup(&self, parent: u64, name: &str) -> VfsResult<Entry> {
        check_name(name)?;
        self.load_dir(parent).await?;
        let Some(ino) = self.nodes.child(parent, name) else {
            return Err(VfsError::not_found(join_path(&self.path_of(parent)?, name)));
        };
        self.nodes.remember(ino);
        self.attr(ino)
    }

    /// Children of `ino`, sorted by name.
    pub async fn readdir(&self, ino: u64) -> VfsResult<Vec<DirEntry>> {
        self.load_dir(ino).await?;
        self.nodes
            .children(ino)
            .ok_or_else(|| VfsError::not_found(format!("inode {ino}")))
    }

    /// Bring the children of `ino` up to date with the store and the remote.
    pub(crate) async fn load_dir(&self, ino: u64) -> VfsResult<()> {
        self.require_dir(ino)?;
        let loaded_at = self
            .nodes
            .with(ino, |n| match n {
                Node::Dir(d) => d.loaded_at,
                Node::File(_) => None,
            })
            .flatten();
        if loaded_at.is_some_and(|t| t.elapsed() < self.config.listing_ttl) {
            return Ok(());
        }

        let ns = self.path_of(ino)?;
        let prefix = self
            .nodes
            .remote_prefix(ino)
            .ok_or_else(|| VfsError::not_found(&ns))?;
        let listing = self.remote.list_objects(&prefix, false).await;

        // Merge against the store as it is once the listing is back, so
        // records committed meanwhile are not overwritten.
        let mut tx = self.meta.begin(true).await?;
        let stored = tx.bucket(&ns).entries()?;
        let (merged, vanished) = match listing {
            Ok(listing) => self.merge_listing(&prefix, stored, listing),
            Err(e) if !stored.is_empty() => {
                warn!(dir = %ns, error = %e, "listing failed, serving stored entries");
                (stored, Vec::new())
            }
            Err(e) => return Err(e.into()),
        };
        let attached = self
            .nodes
            .reconcile(ino, merged, |child| self.handles.is_open(child));

        // A record whose file is open but not yet published stays.
        let kept: HashSet<&str> = attached.iter().map(|e| e.path.as_str()).collect();
        for gone in vanished
            .iter()
            .filter(|e| !kept.contains(e.path.as_str()) && !self.handles.is_open(e.inode))
        {
            tx.bucket(&ns).delete(&gone.path)?;
            if gone.is_dir() {
                tx.drop_tree(&join_path(&ns, &gone.path))?;
            }
        }
        {
            let mut b = tx.bucket(&ns);
            for e in &attached {
                b.put(&e.path, e)?;
            }
        }
        tx.commit()?;
        debug!(dir = %ns, entries = attached.len(), "directory loaded");
        Ok(())
    }

    /// Merge stored records with a delimited listing of `prefix`. Returns the
    /// entries that exist remotely and the stored ones that no longer do.
    fn merge_listing(
        &self,
        prefix: &str,
        stored: Vec<Entry>,
        listing: ObjectListing,
    ) -> (Vec<Entry>, Vec<Entry>) {
        let mut by_name: HashMap<String, Entry> =
            stored.into_iter().map(|e| (e.path.clone(), e)).collect();
        let mut merged: Vec<Entry> = Vec::new();

        for obj in listing.objects {
            let Some(name) = obj.key.strip_prefix(prefix) else {
                continue;
            };
            if check_name(name).is_err() {
                continue;
            }
            let mut e = by_name
                .remove(name)
                .filter(|e| !e.is_dir())
                .unwrap_or_else(|| {
                    Entry::file(
                        name,
                        0,
                        self.config.file_mode,
                        self.config.uid,
                        self.config.gid,
                    )
                });
            if e.etag != obj.etag {
                e.size = obj.size;
                e.etag = obj.etag;
                if let Some(t) = obj.last_modified {
                    e.mtime = t;
                }
            }
            merged.push(e);
        }

        for p in listing.prefixes {
            let Some(name) = p.strip_prefix(prefix).map(|n| n.trim_end_matches('/')) else {
                continue;
            };
            if check_name(name).is_err() || merged.iter().any(|e| e.path == name) {
                continue;
            }
            let e = by_name
                .remove(name)
                .filter(|e| e.is_dir())
                .unwrap_or_else(|| {
                    Entry::dir(
                        name,
                        0,
                        self.config.dir_mode,
                        self.config.uid,
                        self.config.gid,
                    )
                });
            merged.push(e);
        }

        (merged, by_name.into_values().collect())
    }

    /// Create and open a new empty file. The record, the cache file and the
    /// dirty handle are set up under one transaction, so closing the handle
    /// publishes the (possibly empty) object.
    pub async fn create(
        &self,
        parent: u64,
        name: &str,
        mode: u32,
        flags: u32,
        uid: u32,
        gid: u32,
    ) -> VfsResult<(Entry, u64)> {
        check_name(name)?;
        self.load_dir(parent).await?;
        let parent_path = self.path_of(parent)?;
        let path = join_path(&parent_path, name);
        let _guard = self.locks.lock(&path).await;
        if self.nodes.child(parent, name).is_some() {
            return Err(VfsError::AlreadyExists { path });
        }

        let ino = self.nodes.alloc_ino();
        let entry = Entry::file(name, ino, mode, uid, gid);
        let mut tx = self.meta.begin(true).await?;
        let cache_path = self.cache.new_path();
        let file = self.cache.create(&cache_path).await?;
        let hflags = HandleFlags::from_open_flags(flags);

        let fh = self
            .handles
            .register(ino, cache_path.clone(), file, hflags, true);
        let stored = tx.bucket(&parent_path).put(name, &entry);
        let committed = stored.and_then(|()| tx.commit());
        if let Err(e) = committed {
            self.handles.remove(fh);
            self.discard(&cache_path).await;
            return Err(e.into());
        }

        self.nodes.attach(parent, Node::file(entry.clone(), parent));
        self.nodes.remember(ino);
        debug!(ino, fh, path = %path, "fuse.create");
        Ok((entry, fh))
    }

    /// Create a directory: publish its marker object, then its record.
    pub async fn mkdir(
        &self,
        parent: u64,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
    ) -> VfsResult<Entry> {
        check_name(name)?;
        self.load_dir(parent).await?;
        let parent_path = self.path_of(parent)?;
        let path = join_path(&parent_path, name);
        let _guard = self.locks.lock(&path).await;
        if self.nodes.child(parent, name).is_some() {
            return Err(VfsError::AlreadyExists { path });
        }

        let prefix = self
            .nodes
            .remote_prefix(parent)
            .ok_or_else(|| VfsError::not_found(&parent_path))?;
        let ino = self.nodes.alloc_ino();
        let mut entry = Entry::dir(name, ino, mode, uid, gid);
        entry.etag = self
            .remote
            .put_object(&format!("{prefix}{name}/"), &[])
            .await?;
        let node = Node::Dir(DirNode {
            loaded_at: Some(Instant::now()),
            ..DirNode::new(entry.clone(), Some(parent))
        });
        self.meta
            .update(|tx| node.store(&mut tx.bucket(&parent_path)))
            .await?;
        self.nodes.attach(parent, node);
        self.nodes.remember(ino);
        info!(path = %path, "mkdir");
        Ok(entry)
    }

    pub async fn unlink(&self, parent: u64, name: &str) -> VfsResult<()> {
        self.remove(parent, name, FileType::File).await
    }

    pub async fn rmdir(&self, parent: u64, name: &str) -> VfsResult<()> {
        self.remove(parent, name, FileType::Dir).await
    }

    /// Delete the remote object (or directory marker) and the record of
    /// `name`. Directories must be empty.
    async fn remove(&self, parent: u64, name: &str, kind: FileType) -> VfsResult<()> {
        check_name(name)?;
        self.load_dir(parent).await?;
        let parent_path = self.path_of(parent)?;
        let path = join_path(&parent_path, name);
        let ino = self
            .nodes
            .child(parent, name)
            .ok_or_else(|| VfsError::not_found(&path))?;
        let (_guard, path) = self.lock_node(ino).await?;
        if self.nodes.child(parent, name) != Some(ino) {
            return Err(VfsError::not_found(path));
        }

        let node = self
            .nodes
            .with(ino, Node::clone)
            .ok_or_else(|| VfsError::not_found(&path))?;
        let key = match (kind, node.kind()) {
            (FileType::File, FileType::Dir) => {
                return Err(VfsError::IsADirectory { path });
            }
            (FileType::Dir, FileType::File) => {
                return Err(VfsError::NotADirectory { path });
            }
            (FileType::Dir, _) => {
                self.load_dir(ino).await?;
                if self.nodes.children(ino).is_some_and(|c| !c.is_empty()) {
                    return Err(VfsError::DirectoryNotEmpty { path });
                }
                self.nodes.remote_prefix(ino)
            }
            (FileType::File, _) => self.nodes.remote_path(ino),
        }
        .ok_or_else(|| VfsError::not_found(&path))?;

        match self.remote.delete_object(&key).await {
            Err(e) if !e.is_not_found() => return Err(e.into()),
            _ => {}
        }
        self.meta
            .update(|tx| -> MetaResult<()> {
                node.delete(&mut tx.bucket(&parent_path))?;
                if kind == FileType::Dir {
                    tx.drop_tree(&path)?;
                }
                Ok(())
            })
            .await?;
        if kind == FileType::File {
            self.handles.mark_unlinked(ino);
        }
        self.nodes.detach(parent, name);
        info!(path = %path, "removed");
        Ok(())
    }

    /// Move `name` under `parent` to `new_name` under `new_parent`.
    ///
    /// Object stores cannot rename, so content is copied to the new keys and
    /// the old keys are deleted. Records move between namespaces in one
    /// transaction; a directory's descendant namespaces are re-keyed with it,
    /// and the descendants' remote paths follow from the relinked node.
    pub async fn rename(
        &self,
        parent: u64,
        name: &str,
        new_parent: u64,
        new_name: &str,
    ) -> VfsResult<()> {
        check_name(name)?;
        check_name(new_name)?;
        self.load_dir(parent).await?;
        self.load_dir(new_parent).await?;

        let old_ns = self.path_of(parent)?;
        let new_ns = self.path_of(new_parent)?;
        let old_path = join_path(&old_ns, name);
        let new_path = join_path(&new_ns, new_name);
        let src = self
            .nodes
            .child(parent, name)
            .ok_or_else(|| VfsError::not_found(&old_path))?;
        if old_path == new_path {
            return Ok(());
        }
        let src_is_dir = self.nodes.kind(src) == Some(FileType::Dir);
        if src_is_dir && new_path.starts_with(&format!("{old_path}/")) {
            return Err(VfsError::InvalidName {
                name: new_name.to_string(),
            });
        }

        // Descendants move with a directory; opens and uploads below it
        // must not run while their keys are copied.
        let mut paths = vec![old_path.clone(), new_path.clone()];
        if src_is_dir {
            paths.extend(
                self.nodes
                    .descendants(src)
                    .into_iter()
                    .filter_map(|d| self.nodes.full_path(d)),
            );
        }
        let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
        let _guards = self.locks.lock_many(&paths).await;
        if self.nodes.child(parent, name) != Some(src) {
            return Err(VfsError::not_found(old_path));
        }

        let target = self.nodes.child(new_parent, new_name);
        if let Some(t) = target {
            let target_is_dir = self.nodes.kind(t) == Some(FileType::Dir);
            match (src_is_dir, target_is_dir) {
                (false, true) => return Err(VfsError::IsADirectory { path: new_path }),
                (true, false) => return Err(VfsError::NotADirectory { path: new_path }),
                (true, true) => {
                    self.load_dir(t).await?;
                    if self.nodes.children(t).is_some_and(|c| !c.is_empty()) {
                        return Err(VfsError::DirectoryNotEmpty { path: new_path });
                    }
                }
                (false, false) => {}
            }
        }

        let old_remote = self
            .nodes
            .remote_path(src)
            .ok_or_else(|| VfsError::not_found(&old_path))?;
        let new_remote = format!(
            "{}{new_name}",
            self.nodes
                .remote_prefix(new_parent)
                .ok_or_else(|| VfsError::not_found(&new_ns))?
        );

        let mut entry = self.attr(src)?;
        if src_is_dir {
            self.move_prefix(&format!("{old_remote}/"), &format!("{new_remote}/"))
                .await?;
        } else {
            match self.remote.copy_object(&old_remote, &new_remote).await {
                Ok(etag) => {
                    entry.etag = etag;
                    self.remote.delete_object(&old_remote).await?;
                }
                // never uploaded yet: the open handle publishes it under the new name
                Err(e) if e.is_not_found() && self.handles.is_open(src) => {}
                Err(e) => return Err(e.into()),
            }
        }

        entry.path = new_name.to_string();
        self.meta
            .update(|tx| -> MetaResult<()> {
                if target.is_some() {
                    tx.bucket(&new_ns).delete(new_name)?;
                    tx.drop_tree(&new_path)?;
                }
                tx.bucket(&old_ns).delete(name)?;
                tx.bucket(&new_ns).put(new_name, &entry)?;
                if src_is_dir {
                    tx.rename_tree(&old_path, &new_path)?;
                }
                Ok(())
            })
            .await?;

        if let Some(t) = target {
            self.handles.mark_unlinked(t);
        }
        self.nodes.relink(parent, name, new_parent, new_name);
        self.nodes.with_mut(src, |n| n.attr_mut().etag = entry.etag.clone());
        info!(from = %old_path, to = %new_path, "renamed");
        Ok(())
    }

    /// Copy every object under `from` to the same suffix under `to`, then
    /// delete the originals, deepest keys first.
    async fn move_prefix(&self, from: &str, to: &str) -> VfsResult<()> {
        let listing = self.remote.list_objects(from, true).await?;
        let mut keys = Vec::with_capacity(listing.objects.len());
        for obj in &listing.objects {
            let Some(suffix) = obj.key.strip_prefix(from) else {
                continue;
            };
            self.remote
                .copy_object(&obj.key, &format!("{to}{suffix}"))
                .await?;
            keys.push(obj.key.as_str());
        }
        self.remote.put_object(to, &[]).await?;

        keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
        for key in keys {
            self.remote.delete_object(key).await?;
        }
        debug!(from, to, objects = listing.objects.len(), "prefix moved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::cadapter::client::ObjectBackend;
    use crate::vfs::fs::SetAttrRequest;
    use crate::vfs::fs::tests::{expire_listing, fixture};
    use crate::vfs::node::{FileType, ROOT_INO};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listing_discovers_remote_objects() {
        let f = fixture().await;
        f.backend.put_object("top.txt", b"12345").await.unwrap();
        f.backend.put_object("docs/", &[]).await.unwrap();
        f.backend.put_object("docs/inner.txt", b"x").await.unwrap();

        let entries = f.vfs.readdir(ROOT_INO).await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind)).collect();
        assert_eq!(names, vec![("docs", FileType::Dir), ("top.txt", FileType::File)]);

        let top = f.vfs.lookup(ROOT_INO, "top.txt").await.unwrap();
        assert_eq!(top.size, 5);
        let stored = f
            .vfs
            .meta
            .view(|tx| tx.bucket("/").get("top.txt"))
            .await
            .unwrap();
        assert_eq!(stored.inode, top.inode);
    }

    #[tokio::test]
    async fn test_listing_is_cached_within_ttl() {
        let f = fixture().await;
        f.vfs.readdir(ROOT_INO).await.unwrap();
        f.vfs.readdir(ROOT_INO).await.unwrap();
        assert!(f.vfs.lookup(ROOT_INO, "nope").await.unwrap_err().is_not_found());
        assert_eq!(
            f.backend
                .stats()
                .lists
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_listing_keeps_attributes_committed_meanwhile() {
        let f = fixture().await;
        f.backend.put_object("a.txt", b"abc").await.unwrap();
        let ino = f.vfs.lookup(ROOT_INO, "a.txt").await.unwrap().inode;
        expire_listing(&f, ROOT_INO);
        f.backend.stats().set_list_delay(Duration::from_millis(200));

        let vfs = Arc::clone(&f.vfs);
        let listing = tokio::spawn(async move { vfs.readdir(ROOT_INO).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let req = SetAttrRequest {
            mode: Some(0o600),
            uid: Some(42),
            ..Default::default()
        };
        f.vfs.setattr(ino, None, req).await.unwrap();
        listing.await.unwrap().unwrap();

        assert_eq!(f.vfs.nodes().child(ROOT_INO, "a.txt"), Some(ino));
        let mem = f.vfs.attr(ino).unwrap();
        assert_eq!((mem.uid, mem.perm()), (42, 0o600));
        let stored = f
            .vfs
            .meta
            .view(|tx| tx.bucket("/").get("a.txt"))
            .await
            .unwrap();
        assert_eq!((stored.uid, stored.perm()), (42, 0o600));
    }

    #[tokio::test]
    async fn test_mkdir_create_remove() {
        let f = fixture().await;
        let docs = f.vfs.mkdir(ROOT_INO, "docs", 0o755, 0, 0).await.unwrap();
        assert!(f.remote_dir.path().join("docs").is_dir());
        assert!(
            f.vfs
                .mkdir(ROOT_INO, "docs", 0o755, 0, 0)
                .await
                .unwrap_err()
                .errno()
                == libc::EEXIST
        );

        let (_, fh) = f
            .vfs
            .create(docs.inode, "a.txt", 0o644, libc::O_WRONLY as u32, 0, 0)
            .await
            .unwrap();
        f.vfs.release(fh).await.unwrap();
        assert!(f.remote_dir.path().join("docs/a.txt").is_file());

        let err = f.vfs.rmdir(ROOT_INO, "docs").await.unwrap_err();
        assert_eq!(err.errno(), libc::ENOTEMPTY);
        let err = f.vfs.unlink(ROOT_INO, "docs").await.unwrap_err();
        assert_eq!(err.errno(), libc::EISDIR);

        f.vfs.unlink(docs.inode, "a.txt").await.unwrap();
        assert!(!f.remote_dir.path().join("docs/a.txt").exists());
        f.vfs.rmdir(ROOT_INO, "docs").await.unwrap();
        assert!(!f.remote_dir.path().join("docs").exists());
        assert!(f.vfs.readdir(ROOT_INO).await.unwrap().is_empty());

        let stored = f
            .vfs
            .meta
            .view(|tx| tx.bucket("/").entries())
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_rename_file_replaces_target() {
        let f = fixture().await;
        for (name, body) in [("a.txt", b"aaa".as_slice()), ("b.txt", b"bbbbbb".as_slice())] {
            let (_, fh) = f
                .vfs
                .create(ROOT_INO, name, 0o644, libc::O_RDWR as u32, 0, 0)
                .await
                .unwrap();
            f.vfs.write(fh, 0, body).await.unwrap();
            f.vfs.release(fh).await.unwrap();
        }
        let a = f.vfs.lookup(ROOT_INO, "a.txt").await.unwrap();

        f.vfs.rename(ROOT_INO, "a.txt", ROOT_INO, "b.txt").await.unwrap();
        assert!(!f.remote_dir.path().join("a.txt").exists());
        assert_eq!(std::fs::read(f.remote_dir.path().join("b.txt")).unwrap(), b"aaa");
        let b = f.vfs.lookup(ROOT_INO, "b.txt").await.unwrap();
        assert_eq!(b.inode, a.inode);
        assert_eq!(b.size, 3);
        let names: Vec<_> = f
            .vfs
            .readdir(ROOT_INO)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_rename_directory_moves_descendants() {
        let f = fixture().await;
        let docs = f.vfs.mkdir(ROOT_INO, "docs", 0o755, 0, 0).await.unwrap();
        let sub = f.vfs.mkdir(docs.inode, "sub", 0o755, 0, 0).await.unwrap();
        let (deep, fh) = f
            .vfs
            .create(sub.inode, "deep.txt", 0o644, libc::O_RDWR as u32, 0, 0)
            .await
            .unwrap();
        f.vfs.write(fh, 0, b"deep").await.unwrap();
        f.vfs.release(fh).await.unwrap();
        assert_eq!(
            f.vfs.nodes().remote_path(deep.inode).unwrap(),
            "docs/sub/deep.txt"
        );

        f.vfs.rename(ROOT_INO, "docs", ROOT_INO, "papers").await.unwrap();

        // no per-descendant bookkeeping: paths follow the renamed ancestor
        assert_eq!(
            f.vfs.nodes().remote_path(deep.inode).unwrap(),
            "papers/sub/deep.txt"
        );
        assert_eq!(
            std::fs::read(f.remote_dir.path().join("papers/sub/deep.txt")).unwrap(),
            b"deep"
        );
        assert!(!f.remote_dir.path().join("docs").exists());

        let stored = f
            .vfs
            .meta
            .view(|tx| tx.bucket("/papers/sub").get("deep.txt"))
            .await
            .unwrap();
        assert_eq!(stored.size, 4);

        // content is still reachable through the moved node
        let fh = f.vfs.open(deep.inode, libc::O_RDONLY as u32).await.unwrap();
        assert_eq!(f.vfs.read(fh, 0, 16).await.unwrap(), b"deep");
        f.vfs.release(fh).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_open_below_directory_being_renamed() {
        let f = fixture().await;
        f.backend.put_object("docs/", &[]).await.unwrap();
        f.backend.put_object("docs/f.txt", b"body").await.unwrap();
        let docs = f.vfs.lookup(ROOT_INO, "docs").await.unwrap().inode;
        let file = f.vfs.lookup(docs, "f.txt").await.unwrap().inode;
        f.backend.stats().set_get_delay(Duration::from_millis(150));

        let vfs = Arc::clone(&f.vfs);
        let open = tokio::spawn(async move { vfs.open(file, libc::O_RDONLY as u32).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        f.vfs.rename(ROOT_INO, "docs", ROOT_INO, "papers").await.unwrap();

        let fh = open.await.unwrap().unwrap();
        assert_eq!(f.vfs.read(fh, 0, 16).await.unwrap(), b"body");
        f.vfs.release(fh).await.unwrap();
        assert_eq!(f.vfs.nodes().remote_path(file).unwrap(), "papers/f.txt");
        assert!(f.remote_dir.path().join("papers/f.txt").is_file());
        assert!(!f.remote_dir.path().join("docs").exists());
        assert!(f.vfs.path_locks().is_empty());
    }

    #[tokio::test]
    async fn test_rename_into_own_subtree_rejected() {
        let f = fixture().await;
        let docs = f.vfs.mkdir(ROOT_INO, "docs", 0o755, 0, 0).await.unwrap();
        let err = f
            .vfs
            .rename(ROOT_INO, "docs", docs.inode, "inner")
            .await
            .unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let f = fixture().await;
        assert_eq!(
            f.vfs.lookup(ROOT_INO, "..").await.unwrap_err().errno(),
            libc::EINVAL
        );
        assert_eq!(
            f.vfs
                .mkdir(ROOT_INO, "a/b", 0o755, 0, 0)
                .await
                .unwrap_err()
                .errno(),
            libc::EINVAL
        );
    }
}
