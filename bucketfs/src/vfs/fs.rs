//! Mount context: owns the node arena, handle table, path locks, cache area
//! and metadata store of one mounted bucket. Created at mount, dropped at
//! unmount.
//!
//! File operations live in `vfs::file`, directory operations in `vfs::dir`.

use crate::cadapter::client::{ObjectBackend, ObjectClient};
use crate::meta::{Entry, MetaResult, MetaStore, ROOT_BUCKET, ROOT_NAME};
use crate::vfs::cache::CacheArea;
use crate::vfs::config::VfsConfig;
use crate::vfs::error::{VfsError, VfsResult};
use crate::vfs::handles::{HandleTable, SharedHandle};
use crate::vfs::node::{FileType, NodeTable, ROOT_INO};
use crate::vfs::path_lock::{PathGuard, PathLocks};
use std::time::SystemTime;
use tracing::{debug, info};

/// Attribute changes requested by the kernel; `None` leaves a field alone.
#[derive(Clone, Debug, Default)]
pub struct SetAttrRequest {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<SystemTime>,
    pub mtime: Option<SystemTime>,
    pub crtime: Option<SystemTime>,
    pub chgtime: Option<SystemTime>,
    pub bkuptime: Option<SystemTime>,
    pub flags: Option<u32>,
}

impl SetAttrRequest {
    fn apply(&self, e: &mut Entry) {
        if let Some(mode) = self.mode {
            e.set_perm(mode);
        }
        if let Some(uid) = self.uid {
            e.uid = uid;
        }
        if let Some(gid) = self.gid {
            e.gid = gid;
        }
        if let Some(size) = self.size {
            e.size = size;
        }
        if let Some(t) = self.atime {
            e.atime = t;
        }
        if let Some(t) = self.mtime {
            e.mtime = t;
        }
        if let Some(t) = self.crtime {
            e.crtime = t;
        }
        if let Some(t) = self.chgtime {
            e.chgtime = t;
        }
        if let Some(t) = self.bkuptime {
            e.bkuptime = t;
        }
        if let Some(flags) = self.flags {
            e.flags = flags;
        }
    }
}

pub struct Vfs<B: ObjectBackend> {
    pub(crate) config: VfsConfig,
    pub(crate) remote: ObjectClient<B>,
    pub(crate) meta: MetaStore,
    pub(crate) cache: CacheArea,
    pub(crate) nodes: NodeTable,
    pub(crate) handles: HandleTable,
    pub(crate) locks: PathLocks,
}

impl<B: ObjectBackend> Vfs<B> {
    pub async fn new(backend: B, config: VfsConfig) -> VfsResult<Self> {
        let meta = MetaStore::open(config.store_path())?;
        let cache = CacheArea::new(config.blob_dir(), config.cache_mode).await?;
        let remote = ObjectClient::new(backend).with_timeout(config.remote_timeout);

        let fresh_root = Entry::dir(ROOT_NAME, ROOT_INO, config.dir_mode, config.uid, config.gid);
        let root = meta
            .update(|tx| -> MetaResult<Entry> {
                let mut b = tx.bucket(ROOT_BUCKET);
                match b.find(ROOT_NAME)? {
                    Some(stored) => Ok(stored),
                    None => {
                        b.put(ROOT_NAME, &fresh_root)?;
                        Ok(fresh_root)
                    }
                }
            })
            .await?;

        info!(
            cache = %config.cache_dir.display(),
            store = %meta.path().display(),
            "vfs ready"
        );
        Ok(Self {
            config,
            remote,
            meta,
            cache,
            nodes: NodeTable::new(root),
            handles: HandleTable::new(),
            locks: PathLocks::new(),
        })
    }

    pub fn config(&self) -> &VfsConfig {
        &self.config
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn nodes(&self) -> &NodeTable {
        &self.nodes
    }

    pub fn path_locks(&self) -> &PathLocks {
        &self.locks
    }

    pub fn root_ino(&self) -> u64 {
        ROOT_INO
    }

    /// In-memory attributes of `ino`; never touches the store or the remote.
    pub fn attr(&self, ino: u64) -> VfsResult<Entry> {
        self.nodes
            .attr(ino)
            .ok_or_else(|| VfsError::not_found(format!("inode {ino}")))
    }

    pub fn parent_of(&self, ino: u64) -> Option<u64> {
        self.nodes.with(ino, |n| n.parent()).flatten()
    }

    /// Apply the valid fields of `req` and persist the entry in one write
    /// transaction. A size change is carried out on the cache (and uploaded
    /// when no handle is open) first.
    pub async fn setattr(
        &self,
        ino: u64,
        fh: Option<u64>,
        req: SetAttrRequest,
    ) -> VfsResult<Entry> {
        let kind = self
            .nodes
            .kind(ino)
            .ok_or_else(|| VfsError::not_found(format!("inode {ino}")))?;
        if let Some(size) = req.size {
            if kind == FileType::Dir {
                return Err(VfsError::IsADirectory {
                    path: self.path_of(ino)?,
                });
            }
            self.resize(ino, fh, size).await?;
        }

        let key = self
            .nodes
            .record_key(ino)
            .ok_or_else(|| VfsError::not_found(format!("inode {ino}")))?;
        let entry = self
            .meta
            .update(|tx| -> VfsResult<Entry> {
                // Memory is updated before the commit; a failed commit leaves
                // it ahead of the store until the next reload.
                let entry = self
                    .nodes
                    .with_mut(ino, |n| {
                        req.apply(n.attr_mut());
                        n.attr().clone()
                    })
                    .ok_or_else(|| VfsError::not_found(&key.name))?;
                key.open(tx).put(&key.name, &entry)?;
                Ok(entry)
            })
            .await?;
        debug!(ino, ?req, "setattr");
        Ok(entry)
    }

    /// Count one more kernel reference to `ino`.
    pub fn remember(&self, ino: u64) {
        self.nodes.remember(ino);
    }

    /// Drop kernel references; an unreferenced file without open handles is
    /// evicted from memory. Its record stays in the store.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if self.nodes.forget(ino, nlookup) == Some(0)
            && !self.handles.is_open(ino)
            && self.nodes.evict(ino)
        {
            debug!(ino, "node evicted");
        }
    }

    pub(crate) fn path_of(&self, ino: u64) -> VfsResult<String> {
        self.nodes
            .full_path(ino)
            .ok_or_else(|| VfsError::not_found(format!("inode {ino}")))
    }

    pub(crate) fn handle(&self, fh: u64) -> VfsResult<SharedHandle> {
        self.handles.get(fh).ok_or(VfsError::BadHandle { fh })
    }

    /// Take the path lock of `ino`, retrying if a rename moved the node while
    /// we waited. Fails with NotFound once the node is gone.
    pub(crate) async fn lock_node(&self, ino: u64) -> VfsResult<(PathGuard<'_>, String)> {
        loop {
            let path = self.path_of(ino)?;
            let guard = self.locks.lock(&path).await;
            if self.nodes.full_path(ino).as_deref() == Some(path.as_str()) {
                return Ok((guard, path));
            }
        }
    }

    pub(crate) fn require_dir(&self, ino: u64) -> VfsResult<()> {
        match self.nodes.kind(ino) {
            Some(FileType::Dir) => Ok(()),
            Some(FileType::File) => Err(VfsError::NotADirectory {
                path: self.path_of(ino)?,
            }),
            None => Err(VfsError::not_found(format!("inode {ino}"))),
        }
    }
}

pub(crate) fn check_name(name: &str) -> VfsResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(VfsError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
