//! Remote object store adapter (cAdapter)
//!
//! Submodules:
//! - `client`: the backend trait and the timeout-bounded client used by the VFS
//! - `localfs`: directory-backed backend for tests and local mounts
//! - `s3`: S3-compatible backend
pub mod client;
pub mod localfs;
pub mod s3;

#[cfg(test)]
pub mod testing;
