//! File handle management
//!
//! A `FileHandle` is one open instance of a file: the cache descriptor it
//! reads and writes, and whether the cache now differs from the remote
//! object. The `HandleTable` is the only authority on which files are open.

use dashmap::DashMap;
use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleFlags {
    pub read: bool,
    pub write: bool,
    pub truncate: bool,
}

impl HandleFlags {
    pub const fn new(read: bool, write: bool) -> Self {
        Self {
            read,
            write,
            truncate: false,
        }
    }

    /// Decode open(2) flags.
    pub fn from_open_flags(flags: u32) -> Self {
        let flags = flags as i32;
        let (read, write) = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => (false, true),
            libc::O_RDWR => (true, true),
            _ => (true, false),
        };
        Self {
            read,
            write,
            truncate: flags & libc::O_TRUNC != 0,
        }
    }
}

pub struct FileHandle {
    pub fh: u64,
    pub ino: u64,
    pub cache_path: PathBuf,
    pub flags: HandleFlags,
    pub opened_at: Instant,
    pub dirty: bool,
    unlinked: Arc<AtomicBool>,
    file: Option<File>,
}

impl FileHandle {
    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("handle already closed"))
    }

    pub async fn read_at(&mut self, offset: u64, size: usize) -> io::Result<Vec<u8>> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; size];
        let mut filled = 0;
        while filled < size {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    pub async fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<usize> {
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        self.dirty = true;
        Ok(data.len())
    }

    /// Push buffered writes down to the cache file.
    pub async fn sync(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }

    /// Close the descriptor. Later I/O on this handle fails.
    pub fn close(&mut self) {
        self.file.take();
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// The file was unlinked or replaced while this handle was open; its
    /// content has nowhere to go.
    pub fn is_unlinked(&self) -> bool {
        self.unlinked.load(Ordering::SeqCst)
    }
}

pub type SharedHandle = Arc<Mutex<FileHandle>>;

struct Slot {
    ino: u64,
    unlinked: Arc<AtomicBool>,
    handle: SharedHandle,
}

pub struct HandleTable {
    next_fh: AtomicU64,
    slots: DashMap<u64, Slot>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_fh: AtomicU64::new(1),
            slots: DashMap::new(),
        }
    }

    /// Register an open cache file for `ino` and return its handle id.
    pub fn register(
        &self,
        ino: u64,
        cache_path: PathBuf,
        file: File,
        flags: HandleFlags,
        dirty: bool,
    ) -> u64 {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        let unlinked = Arc::new(AtomicBool::new(false));
        let handle = FileHandle {
            fh,
            ino,
            cache_path,
            flags,
            opened_at: Instant::now(),
            dirty,
            unlinked: unlinked.clone(),
            file: Some(file),
        };
        self.slots.insert(
            fh,
            Slot {
                ino,
                unlinked,
                handle: Arc::new(Mutex::new(handle)),
            },
        );
        debug!(fh, ino, dirty, "handle registered");
        fh
    }

    pub fn get(&self, fh: u64) -> Option<SharedHandle> {
        self.slots.get(&fh).map(|s| s.handle.clone())
    }

    pub fn remove(&self, fh: u64) -> Option<SharedHandle> {
        self.slots.remove(&fh).map(|(_, s)| {
            debug!(fh, ino = s.ino, "handle removed");
            s.handle
        })
    }

    pub fn is_open(&self, ino: u64) -> bool {
        self.slots.iter().any(|s| s.ino == ino)
    }

    /// Flag every handle of `ino` as unlinked. Returns how many were open.
    pub fn mark_unlinked(&self, ino: u64) -> usize {
        let mut n = 0;
        for s in self.slots.iter().filter(|s| s.ino == ino) {
            s.unlinked.store(true, Ordering::SeqCst);
            n += 1;
        }
        if n > 0 {
            debug!(ino, handles = n, "open handles unlinked");
        }
        n
    }

    pub fn handles_for(&self, ino: u64) -> Vec<SharedHandle> {
        self.slots
            .iter()
            .filter(|s| s.ino == ino)
            .map(|s| s.handle.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
