//! VFS layer (virtual filesystem)
//!
//! Translates inode-level requests into operations on the node arena, the
//! cache area, the metadata store and the remote object store.
//!
//! Submodules:
//! - `fs`: the mount context and attribute operations
//! - `file`: open, handle I/O and publication of dirty handles
//! - `dir`: lookup, listing, create, mkdir, remove and rename
//! - `node`: in-memory file and directory nodes
//! - `handles`: file handle table
//! - `path_lock`: per-path async mutexes
//! - `cache`: local cache files
pub mod cache;
pub mod config;
pub mod dir;
pub mod error;
pub mod file;
pub mod fs;
pub mod handles;
pub mod node;
pub mod path_lock;
