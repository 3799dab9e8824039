//! In-memory node arena.
//!
//! Every known file and directory is a `Node` keyed by inode. Directories own
//! their children's slots through their child map; a child only records its
//! parent's inode, so a node's path (local or remote) is always derived by
//! walking up to the root and renaming a directory moves its whole subtree
//! with a single link change.

use crate::meta::{Bucket, Entry, MetaResult, ROOT_BUCKET, ROOT_NAME, Tx};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub const ROOT_INO: u64 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    File,
    Dir,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub ino: u64,
    pub name: String,
    pub kind: FileType,
}

#[derive(Clone, Debug)]
pub struct FileNode {
    pub entry: Entry,
    pub parent: u64,
    pub lookups: u64,
}

#[derive(Clone, Debug)]
pub struct DirNode {
    pub entry: Entry,
    /// `None` only for the root.
    pub parent: Option<u64>,
    pub children: HashMap<String, u64>,
    /// When the children were last reconciled with the remote listing.
    pub loaded_at: Option<Instant>,
    pub lookups: u64,
}

impl DirNode {
    pub fn new(entry: Entry, parent: Option<u64>) -> Self {
        Self {
            entry,
            parent,
            children: HashMap::new(),
            loaded_at: None,
            lookups: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub enum Node {
    File(FileNode),
    Dir(DirNode),
}

impl Node {
    pub fn file(entry: Entry, parent: u64) -> Self {
        Node::File(FileNode {
            entry,
            parent,
            lookups: 0,
        })
    }

    pub fn dir(entry: Entry, parent: u64) -> Self {
        Node::Dir(DirNode::new(entry, Some(parent)))
    }

    /// Attribute snapshot, served without any I/O.
    pub fn attr(&self) -> &Entry {
        match self {
            Node::File(f) => &f.entry,
            Node::Dir(d) => &d.entry,
        }
    }

    pub fn attr_mut(&mut self) -> &mut Entry {
        match self {
            Node::File(f) => &mut f.entry,
            Node::Dir(d) => &mut d.entry,
        }
    }

    pub fn ino(&self) -> u64 {
        self.attr().inode
    }

    pub fn name(&self) -> &str {
        &self.attr().path
    }

    pub fn parent(&self) -> Option<u64> {
        match self {
            Node::File(f) => Some(f.parent),
            Node::Dir(d) => d.parent,
        }
    }

    fn set_parent(&mut self, parent: u64) {
        match self {
            Node::File(f) => f.parent = parent,
            Node::Dir(d) => d.parent = Some(parent),
        }
    }

    pub fn kind(&self) -> FileType {
        match self {
            Node::File(_) => FileType::File,
            Node::Dir(_) => FileType::Dir,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Node::Dir(_))
    }

    fn lookups_mut(&mut self) -> &mut u64 {
        match self {
            Node::File(f) => &mut f.lookups,
            Node::Dir(d) => &mut d.lookups,
        }
    }

    pub fn dirent(&self) -> DirEntry {
        DirEntry {
            ino: self.ino(),
            name: self.name().to_string(),
            kind: self.kind(),
        }
    }

    /// Persist this node's record into `bucket`.
    pub fn store(&self, bucket: &mut Bucket<'_>) -> MetaResult<()> {
        bucket.put(self.name(), self.attr())
    }

    /// Remove this node's record from `bucket`. Remote content is untouched.
    pub fn delete(&self, bucket: &mut Bucket<'_>) -> MetaResult<()> {
        bucket.delete(self.name())
    }
}

/// Where a node's record lives: (namespace, record name).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordKey {
    pub bucket: String,
    pub name: String,
}

impl RecordKey {
    pub fn open<'a>(&self, tx: &'a mut Tx) -> Bucket<'a> {
        tx.bucket(&self.bucket)
    }
}

pub struct NodeTable {
    nodes: RwLock<HashMap<u64, Node>>,
    next_ino: AtomicU64,
}

impl NodeTable {
    pub fn new(mut root: Entry) -> Self {
        root.inode = ROOT_INO;
        root.path = String::new();
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_INO, Node::Dir(DirNode::new(root, None)));
        Self {
            nodes: RwLock::new(nodes),
            next_ino: AtomicU64::new(ROOT_INO + 1),
        }
    }

    pub fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    pub fn contains(&self, ino: u64) -> bool {
        self.nodes.read().contains_key(&ino)
    }

    pub fn with<R>(&self, ino: u64, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.nodes.read().get(&ino).map(f)
    }

    pub fn with_mut<R>(&self, ino: u64, f: impl FnOnce(&mut Node) -> R) -> Option<R> {
        self.nodes.write().get_mut(&ino).map(f)
    }

    pub fn attr(&self, ino: u64) -> Option<Entry> {
        self.with(ino, |n| n.attr().clone())
    }

    pub fn kind(&self, ino: u64) -> Option<FileType> {
        self.with(ino, Node::kind)
    }

    pub fn child(&self, parent: u64, name: &str) -> Option<u64> {
        match self.nodes.read().get(&parent)? {
            Node::Dir(d) => d.children.get(name).copied(),
            Node::File(_) => None,
        }
    }

    /// Children of a directory, sorted by name.
    pub fn children(&self, parent: u64) -> Option<Vec<DirEntry>> {
        let nodes = self.nodes.read();
        let Node::Dir(d) = nodes.get(&parent)? else {
            return None;
        };
        let mut out: Vec<DirEntry> = d
            .children
            .values()
            .filter_map(|ino| nodes.get(ino).map(Node::dirent))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Some(out)
    }

    /// Every node below `ino` in memory, parents before their children.
    pub fn descendants(&self, ino: u64) -> Vec<u64> {
        let nodes = self.nodes.read();
        let mut out = Vec::new();
        let mut pending = vec![ino];
        while let Some(cur) = pending.pop() {
            if let Some(Node::Dir(d)) = nodes.get(&cur) {
                for &child in d.children.values() {
                    out.push(child);
                    pending.push(child);
                }
            }
        }
        out
    }

    /// Mount-relative path: `/` for the root, `/docs/readme.txt` below it.
    /// Also the key of the node's path lock and, for directories, the name
    /// of the namespace holding its children.
    pub fn full_path(&self, ino: u64) -> Option<String> {
        let nodes = self.nodes.read();
        let mut parts = Vec::new();
        let mut cur = ino;
        loop {
            let node = nodes.get(&cur)?;
            match node.parent() {
                Some(p) => {
                    parts.push(node.name().to_string());
                    cur = p;
                }
                None => break,
            }
        }
        parts.reverse();
        Some(format!("/{}", parts.join("/")))
    }

    /// Bucket-relative object key: `""` for the root, `docs/readme.txt` below it.
    pub fn remote_path(&self, ino: u64) -> Option<String> {
        self.full_path(ino)
            .map(|p| p.trim_start_matches('/').to_string())
    }

    /// Listing prefix of a directory: `""` for the root, `docs/` otherwise.
    pub fn remote_prefix(&self, ino: u64) -> Option<String> {
        let remote = self.remote_path(ino)?;
        Some(if remote.is_empty() {
            remote
        } else {
            format!("{remote}/")
        })
    }

    pub fn record_key(&self, ino: u64) -> Option<RecordKey> {
        let parent = self.with(ino, Node::parent)?;
        match parent {
            None => Some(RecordKey {
                bucket: ROOT_BUCKET.to_string(),
                name: ROOT_NAME.to_string(),
            }),
            Some(p) => Some(RecordKey {
                bucket: self.full_path(p)?,
                name: self.with(ino, |n| n.name().to_string())?,
            }),
        }
    }

    /// Insert `node` under `parent`, replacing any child of the same name.
    /// Returns the displaced child's inode.
    pub fn attach(&self, parent: u64, node: Node) -> Option<u64> {
        let mut nodes = self.nodes.write();
        let ino = node.ino();
        let name = node.name().to_string();
        let displaced = match nodes.get_mut(&parent) {
            Some(Node::Dir(d)) => d.children.insert(name, ino),
            _ => return None,
        };
        if let Some(old) = displaced.filter(|old| *old != ino) {
            Self::remove_subtree(&mut nodes, old);
        }
        nodes.insert(ino, node);
        displaced
    }

    /// Unlink `name` from `parent` and drop its whole subtree from memory.
    pub fn detach(&self, parent: u64, name: &str) -> Option<u64> {
        let mut nodes = self.nodes.write();
        let ino = match nodes.get_mut(&parent) {
            Some(Node::Dir(d)) => d.children.remove(name)?,
            _ => return None,
        };
        Self::remove_subtree(&mut nodes, ino);
        Some(ino)
    }

    fn remove_subtree(nodes: &mut HashMap<u64, Node>, ino: u64) {
        let mut pending = vec![ino];
        while let Some(cur) = pending.pop() {
            if let Some(Node::Dir(d)) = nodes.remove(&cur) {
                pending.extend(d.children.into_values());
            }
        }
    }

    /// Move the child `name` of `parent` to `new_parent` as `new_name`.
    /// A child already named `new_name` there is dropped.
    pub fn relink(&self, parent: u64, name: &str, new_parent: u64, new_name: &str) -> bool {
        let mut nodes = self.nodes.write();
        let Some(ino) = (match nodes.get_mut(&parent) {
            Some(Node::Dir(d)) => d.children.remove(name),
            _ => None,
        }) else {
            return false;
        };
        let displaced = match nodes.get_mut(&new_parent) {
            Some(Node::Dir(d)) => d.children.insert(new_name.to_string(), ino),
            _ => None,
        };
        if let Some(old) = displaced.filter(|old| *old != ino) {
            Self::remove_subtree(&mut nodes, old);
        }
        if let Some(node) = nodes.get_mut(&ino) {
            node.attr_mut().path = new_name.to_string();
            node.set_parent(new_parent);
        }
        true
    }

    /// Replace the children of `dir` with `entries` and mark it loaded.
    ///
    /// Names already known keep their inode and, for directories, their own
    /// children. A child for which `keep` holds keeps its in-memory record
    /// and survives even when `entries` no longer names it. Returns the
    /// records of the resulting children.
    pub fn reconcile(
        &self,
        dir: u64,
        entries: Vec<Entry>,
        keep: impl Fn(u64) -> bool,
    ) -> Vec<Entry> {
        let mut nodes = self.nodes.write();
        let mut known = match nodes.get(&dir) {
            Some(Node::Dir(d)) => d.children.clone(),
            _ => return Vec::new(),
        };
        let mut children = HashMap::with_capacity(entries.len());
        let mut out = Vec::with_capacity(entries.len());

        for mut entry in entries {
            let name = entry.path.clone();
            if let Some(ino) = known.remove(&name) {
                let same_kind = nodes.get(&ino).is_some_and(|n| n.is_dir() == entry.is_dir());
                if keep(ino) {
                    if let Some(n) = nodes.get(&ino) {
                        out.push(n.attr().clone());
                        children.insert(name, ino);
                    }
                    continue;
                }
                if same_kind {
                    entry.inode = ino;
                    if let Some(n) = nodes.get_mut(&ino) {
                        *n.attr_mut() = entry.clone();
                    }
                    out.push(entry);
                    children.insert(name, ino);
                    continue;
                }
                Self::remove_subtree(&mut nodes, ino);
            }

            let ino = self.alloc_ino();
            entry.inode = ino;
            let node = if entry.is_dir() {
                Node::dir(entry.clone(), dir)
            } else {
                Node::file(entry.clone(), dir)
            };
            nodes.insert(ino, node);
            out.push(entry);
            children.insert(name, ino);
        }

        for (name, ino) in known {
            if keep(ino) {
                if let Some(n) = nodes.get(&ino) {
                    out.push(n.attr().clone());
                    children.insert(name, ino);
                }
            } else {
                Self::remove_subtree(&mut nodes, ino);
            }
        }

        if let Some(Node::Dir(d)) = nodes.get_mut(&dir) {
            d.children = children;
            d.loaded_at = Some(Instant::now());
        }
        out
    }

    pub fn remember(&self, ino: u64) {
        self.with_mut(ino, |n| *n.lookups_mut() += 1);
    }

    /// Drop `n` kernel references; returns the remaining count.
    pub fn forget(&self, ino: u64, n: u64) -> Option<u64> {
        self.with_mut(ino, |node| {
            let lookups = node.lookups_mut();
            *lookups = lookups.saturating_sub(n);
            *lookups
        })
    }

    /// Evict an unreferenced node. Directories with children in memory stay.
    /// The parent is marked for a reload so the name can be resolved again.
    pub fn evict(&self, ino: u64) -> bool {
        if ino == ROOT_INO {
            return false;
        }
        let mut nodes = self.nodes.write();
        let (parent, name) = match nodes.get(&ino) {
            Some(Node::Dir(d)) if !d.children.is_empty() => return false,
            Some(n) => match n.parent() {
                Some(p) => (p, n.name().to_string()),
                None => return false,
            },
            None => return false,
        };
        nodes.remove(&ino);
        if let Some(Node::Dir(d)) = nodes.get_mut(&parent) {
            if d.children.get(&name) == Some(&ino) {
                d.children.remove(&name);
            }
            d.loaded_at = None;
        }
        true
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}
