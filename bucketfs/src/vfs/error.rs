//! Error surface of the VFS layer. Every variant maps onto one errno so the
//! FUSE adapter can answer the kernel without inspecting messages.

use crate::cadapter::client::ObjectError;
use crate::meta::MetaError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VfsError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("remote transfer failed: {0}")]
    TransferFailure(#[source] ObjectError),

    #[error("cache io: {0}")]
    CacheIoFailure(#[from] std::io::Error),

    #[error("metadata transaction failed: {0}")]
    StoreTransactionFailure(#[source] MetaError),

    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error("not a directory: {path}")]
    NotADirectory { path: String },

    #[error("is a directory: {path}")]
    IsADirectory { path: String },

    #[error("directory not empty: {path}")]
    DirectoryNotEmpty { path: String },

    #[error("bad file handle {fh}")]
    BadHandle { fh: u64 },

    #[error("invalid name {name:?}")]
    InvalidName { name: String },
}

impl VfsError {
    pub fn not_found(path: impl Into<String>) -> Self {
        VfsError::NotFound { path: path.into() }
    }

    pub fn errno(&self) -> i32 {
        match self {
            VfsError::NotFound { .. } => libc::ENOENT,
            VfsError::TransferFailure(_) => libc::EIO,
            VfsError::CacheIoFailure(_) => libc::EIO,
            VfsError::StoreTransactionFailure(_) => libc::EIO,
            VfsError::AlreadyExists { .. } => libc::EEXIST,
            VfsError::NotADirectory { .. } => libc::ENOTDIR,
            VfsError::IsADirectory { .. } => libc::EISDIR,
            VfsError::DirectoryNotEmpty { .. } => libc::ENOTEMPTY,
            VfsError::BadHandle { .. } => libc::EBADF,
            VfsError::InvalidName { .. } => libc::EINVAL,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VfsError::NotFound { .. })
    }
}

impl From<ObjectError> for VfsError {
    fn from(e: ObjectError) -> Self {
        match e {
            ObjectError::NotFound { key } => VfsError::NotFound { path: key },
            other => VfsError::TransferFailure(other),
        }
    }
}

impl From<MetaError> for VfsError {
    fn from(e: MetaError) -> Self {
        match e {
            MetaError::NotFound { bucket, name } => VfsError::NotFound {
                path: format!("{bucket}/{name}"),
            },
            other => VfsError::StoreTransactionFailure(other),
        }
    }
}

pub type VfsResult<T> = Result<T, VfsError>;
