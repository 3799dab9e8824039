//! FUSE adapter and request handling
//!
//! Implements the rfuse3 `Filesystem` trait for `Vfs`, translating kernel
//! requests into Vfs operations and Vfs records into FUSE attributes.
//!
//! Main components:
//! - `mount`: mounting a `Vfs` with rfuse3.
//! - The `Filesystem` implementation for `Vfs`.
//! - Helpers for attribute, time and file type conversion.
pub mod mount;

use crate::cadapter::client::ObjectBackend;
use crate::meta::Entry;
use crate::vfs::error::VfsError;
use crate::vfs::fs::{SetAttrRequest, Vfs};
use crate::vfs::node::FileType as VfsFileType;
use bytes::Bytes;
use rfuse3::Errno;
use rfuse3::Result as FuseResult;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyCreated, ReplyData,
    ReplyDirectory, ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs, ReplyWrite,
};
use std::ffi::{OsStr, OsString};
use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use futures_util::stream::{self, Stream};
use rfuse3::raw::Filesystem;
use rfuse3::{FileType as FuseFileType, SetAttr, Timestamp};

const MAX_WRITE: u32 = 1024 * 1024;
const BLOCK_SIZE: u32 = 4096;

impl From<VfsError> for Errno {
    fn from(val: VfsError) -> Self {
        let code = val.errno();
        if code == libc::EIO {
            warn!(error = %val, "request failed");
        } else {
            debug!(error = %val, code, "request rejected");
        }
        Errno::from(code)
    }
}


impl<B> Filesystem for Vfs<B>
where
    B: ObjectBackend + 'static,
{
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        let max_write = NonZeroU32::new(MAX_WRITE).ok_or_else(|| Errno::from(libc::EINVAL))?;
        Ok(ReplyInit { max_write })
    }

    async fn destroy(&self, _req: Request) {
        let open = self.handles().len();
        if open > 0 {
            warn!(open, "unmounting with open handles");
        }
    }

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        let entry = self.lookup(parent, name_str(name)?).await?;
        Ok(ReplyEntry {
            ttl: self.config().attr_ttl,
            attr: to_fuse_attr(&entry),
            generation: 0,
        })
    }

    async fn forget(&self, _req: Request, inode: u64, nlookup: u64) {
        self.forget(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(u64, u64)]) {
        for &(inode, nlookup) in inodes {
            self.forget(inode, nlookup);
        }
    }

    async fn getattr(
        &self,
        _req: Request,
        ino: u64,
        _fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        let entry = self.attr(ino)?;
        Ok(ReplyAttr {
            ttl: self.config().attr_ttl,
            attr: to_fuse_attr(&entry),
        })
    }

    async fn setattr(
        &self,
        _req: Request,
        ino: u64,
        fh: Option<u64>,
        set_attr: SetAttr,
    ) -> FuseResult<ReplyAttr> {
        let entry = self.setattr(ino, fh, fuse_setattr_to_request(&set_attr)).await?;
        Ok(ReplyAttr {
            ttl: self.config().attr_ttl,
            attr: to_fuse_attr(&entry),
        })
    }

    async fn open(&self, _req: Request, ino: u64, flags: u32) -> FuseResult<ReplyOpen> {
        let fh = self.open(ino, flags).await?;
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        let data = self.read(fh, offset, size).await?;
        Ok(ReplyData {
            data: Bytes::from(data),
        })
    }

    async fn write(
        &self,
        _req: Request,
        _ino: u64,
        fh: u64,
        offset: u64,
        data: &[u8],
        _write_flags: u32,
        _flags: u32,
    ) -> FuseResult<ReplyWrite> {
        let written = self.write(fh, offset, data).await?;
        Ok(ReplyWrite { written })
    }

    async fn flush(&self, _req: Request, _inode: u64, fh: u64, _lock_owner: u64) -> FuseResult<()> {
        Ok(self.flush(fh).await?)
    }

    async fn fsync(&self, _req: Request, _inode: u64, fh: u64, _datasync: bool) -> FuseResult<()> {
        Ok(self.fsync(fh).await?)
    }

    async fn release(
        &self,
        _req: Request,
        _inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        Ok(self.release(fh).await?)
    }

    async fn create(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> FuseResult<ReplyCreated> {
        let (entry, fh) = self
            .create(parent, name_str(name)?, mode & 0o7777, flags, req.uid, req.gid)
            .await?;
        Ok(ReplyCreated {
            ttl: self.config().attr_ttl,
            attr: to_fuse_attr(&entry),
            generation: 0,
            fh,
            flags: 0,
        })
    }

    async fn mkdir(
        &self,
        req: Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
    ) -> FuseResult<ReplyEntry> {
        let entry = self
            .mkdir(parent, name_str(name)?, mode & !umask & 0o7777, req.uid, req.gid)
            .await?;
        Ok(ReplyEntry {
            ttl: self.config().attr_ttl,
            attr: to_fuse_attr(&entry),
            generation: 0,
        })
    }

    async fn unlink(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        Ok(self.unlink(parent, name_str(name)?).await?)
    }

    async fn rmdir(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<()> {
        Ok(self.rmdir(parent, name_str(name)?).await?)
    }

    async fn rename(
        &self,
        _req: Request,
        parent: u64,
        name: &OsStr,
        new_parent: u64,
        new_name: &OsStr,
    ) -> FuseResult<()> {
        Ok(self
            .rename(parent, name_str(name)?, new_parent, name_str(new_name)?)
            .await?)
    }

    async fn opendir(&self, _req: Request, ino: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        if !self.attr(ino)?.is_dir() {
            return Err(libc::ENOTDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        let children = self.readdir(ino).await?;
        let parent_ino = self.parent_of(ino).unwrap_or(self.root_ino());

        // offsets are 1-based positions; the kernel resumes after `offset`
        let mut all: Vec<DirectoryEntry> = Vec::with_capacity(children.len() + 2);
        all.push(DirectoryEntry {
            inode: ino,
            kind: FuseFileType::Directory,
            name: OsString::from("."),
            offset: 1,
        });
        all.push(DirectoryEntry {
            inode: parent_ino,
            kind: FuseFileType::Directory,
            name: OsString::from(".."),
            offset: 2,
        });
        for (i, e) in children.into_iter().enumerate() {
            all.push(DirectoryEntry {
                inode: e.ino,
                kind: vfs_kind_to_fuse(e.kind),
                name: OsString::from(e.name),
                offset: (i as i64) + 3,
            });
        }

        let start = offset.max(0) as usize;
        let slice: Vec<_> = all.into_iter().skip(start).collect();
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(slice.into_iter().map(Ok)));
        Ok(ReplyDirectory { entries: boxed })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        ino: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        let children = self.readdir(ino).await?;
        let ttl = self.config().attr_ttl;
        let parent_ino = self.parent_of(ino).unwrap_or(self.root_ino());

        let mut all: Vec<DirectoryEntryPlus> = Vec::with_capacity(children.len() + 2);
        for (inode, name, pos) in [(ino, ".", 1), (parent_ino, "..", 2)] {
            let attr = self.attr(inode)?;
            all.push(DirectoryEntryPlus {
                inode,
                generation: 0,
                kind: FuseFileType::Directory,
                name: OsString::from(name),
                offset: pos,
                attr: to_fuse_attr(&attr),
                entry_ttl: ttl,
                attr_ttl: ttl,
            });
        }

        let start = offset as usize;
        for (i, e) in children.into_iter().enumerate() {
            let pos = i + 3;
            if pos <= start {
                continue;
            }
            let Ok(attr) = self.attr(e.ino) else {
                continue;
            };
            // each entry handed out counts as a lookup
            self.remember(e.ino);
            all.push(DirectoryEntryPlus {
                inode: e.ino,
                generation: 0,
                kind: vfs_kind_to_fuse(e.kind),
                name: OsString::from(e.name),
                offset: pos as i64,
                attr: to_fuse_attr(&attr),
                entry_ttl: ttl,
                attr_ttl: ttl,
            });
        }

        let slice: Vec<_> = all
            .into_iter()
            .filter(|e| e.offset as usize > start)
            .collect();
        let boxed: Self::DirEntryPlusStream<'a> =
            Box::pin(stream::iter(slice.into_iter().map(Ok)));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _flags: u32,
    ) -> FuseResult<()> {
        Ok(())
    }

    async fn fsyncdir(
        &self,
        _req: Request,
        _inode: u64,
        _fh: u64,
        _datasync: bool,
    ) -> FuseResult<()> {
        Ok(())
    }

    // Object stores report no capacity; return conservative constants.
    async fn statfs(&self, _req: Request, _ino: u64) -> FuseResult<ReplyStatFs> {
        Ok(ReplyStatFs {
            blocks: 0,
            bfree: 0,
            bavail: 0,
            files: self.nodes().len() as u64,
            ffree: u64::MAX,
            bsize: BLOCK_SIZE,
            namelen: 255,
            frsize: BLOCK_SIZE,
        })
    }

    async fn interrupt(&self, _req: Request, _unique: u64) -> FuseResult<()> {
        Ok(())
    }
}

// =============== helpers ===============
fn name_str(name: &OsStr) -> FuseResult<&str> {
    name.to_str().ok_or_else(|| Errno::from(libc::EINVAL))
}

fn vfs_kind_to_fuse(k: VfsFileType) -> FuseFileType {
    match k {
        VfsFileType::Dir => FuseFileType::Directory,
        VfsFileType::File => FuseFileType::RegularFile,
    }
}

fn to_timestamp(t: SystemTime) -> Timestamp {
    Timestamp::from(t)
}

fn timestamp_to_system_time(ts: Timestamp) -> SystemTime {
    if ts.sec >= 0 {
        UNIX_EPOCH + Duration::new(ts.sec as u64, ts.nsec)
    } else {
        UNIX_EPOCH - Duration::from_secs(ts.sec.unsigned_abs()) + Duration::from_nanos(ts.nsec as u64)
    }
}

fn to_fuse_attr(e: &Entry) -> FileAttr {
    let (kind, nlink) = if e.is_dir() {
        (FuseFileType::Directory, 2)
    } else {
        (FuseFileType::RegularFile, 1)
    };
    FileAttr {
        ino: e.inode,
        size: e.size,
        blocks: e.size.div_ceil(512),
        atime: to_timestamp(e.atime),
        mtime: to_timestamp(e.mtime),
        ctime: to_timestamp(e.chgtime),
        #[cfg(target_os = "macos")]
        crtime: to_timestamp(e.crtime),
        kind,
        perm: e.perm(),
        nlink,
        uid: e.uid,
        gid: e.gid,
        rdev: 0,
        #[cfg(target_os = "macos")]
        flags: e.flags,
        blksize: BLOCK_SIZE,
    }
}

fn fuse_setattr_to_request(set_attr: &SetAttr) -> SetAttrRequest {
    SetAttrRequest {
        mode: set_attr.mode,
        uid: set_attr.uid,
        gid: set_attr.gid,
        size: set_attr.size,
        atime: set_attr.atime.map(timestamp_to_system_time),
        mtime: set_attr.mtime.map(timestamp_to_system_time),
        chgtime: set_attr.ctime.map(timestamp_to_system_time),
        ..Default::default()
    }
}
