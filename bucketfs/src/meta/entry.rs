//! Persisted attribute record shared by files and directories.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// One file or directory as stored in its parent's namespace.
///
/// `path` is the entry's own name segment; full paths are always derived
/// from the node tree. `mode` carries both permission and type bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub path: String,
    pub inode: u64,
    pub mode: u32,
    pub size: u64,
    pub etag: String,

    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub chgtime: SystemTime,
    pub crtime: SystemTime,
    pub bkuptime: SystemTime,

    pub uid: u32,
    pub gid: u32,
    /// chflags(2) bits, kept opaque.
    pub flags: u32,

    /// sha256 of the content last fetched into the cache.
    pub hash: Vec<u8>,
}

impl Entry {
    fn new(path: impl Into<String>, inode: u64, mode: u32, uid: u32, gid: u32) -> Self {
        let now = SystemTime::now();
        Self {
            path: path.into(),
            inode,
            mode,
            size: 0,
            etag: String::new(),
            atime: now,
            mtime: now,
            chgtime: now,
            crtime: now,
            bkuptime: UNIX_EPOCH,
            uid,
            gid,
            flags: 0,
            hash: Vec::new(),
        }
    }

    pub fn file(path: impl Into<String>, inode: u64, perm: u32, uid: u32, gid: u32) -> Self {
        Self::new(path, inode, S_IFREG | (perm & !S_IFMT), uid, gid)
    }

    pub fn dir(path: impl Into<String>, inode: u64, perm: u32, uid: u32, gid: u32) -> Self {
        Self::new(path, inode, S_IFDIR | (perm & !S_IFMT), uid, gid)
    }

    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    /// Permission bits only.
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }

    /// Replace permission bits, keeping the type.
    pub fn set_perm(&mut self, mode: u32) {
        self.mode = (self.mode & S_IFMT) | (mode & 0o7777);
    }

    pub fn encode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn decode(raw: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(raw)
    }
}
