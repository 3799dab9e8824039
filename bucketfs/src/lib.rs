// Library crate for bucketfs: object-store adapters, the attribute store,
// the VFS layer and its FUSE binding.

pub mod cadapter;
pub mod fuse;
pub mod meta;
pub mod vfs;
