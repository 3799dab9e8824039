//! Local directory backend, used as a mock object store (implements ObjectBackend).
//!
//! Keys map to paths under `root`; a directory marker key (`a/b/`) maps to the
//! directory `root/a/b`. ETags are quoted md5 hex digests, as S3 reports them
//! for single-part uploads.

use crate::cadapter::client::{
    ObjectBackend, ObjectError, ObjectListing, ObjectReader, ObjectResult, ObjectSummary,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};

pub struct LocalFsBackend {
    root: PathBuf,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key.trim_end_matches('/'))
    }

    fn etag_of(data: &[u8]) -> String {
        format!("\"{:x}\"", md5::compute(data))
    }

    async fn summary(key: String, path: &Path) -> ObjectResult<ObjectSummary> {
        let meta = fs::metadata(path).await?;
        let etag = if meta.is_file() {
            Self::etag_of(&fs::read(path).await?)
        } else {
            Self::etag_of(&[])
        };
        Ok(ObjectSummary {
            key,
            size: if meta.is_file() { meta.len() } else { 0 },
            etag,
            last_modified: meta.modified().ok(),
        })
    }

    /// Walk `dir` (whose key prefix is `prefix`), collecting every file and marker.
    async fn walk(&self, prefix: String, out: &mut Vec<ObjectSummary>) -> ObjectResult<()> {
        let mut pending = vec![prefix];
        while let Some(prefix) = pending.pop() {
            let dir = self.path_for(&prefix);
            let mut rd = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(ent) = rd.next_entry().await? {
                let name = ent.file_name().to_string_lossy().into_owned();
                if ent.file_type().await?.is_dir() {
                    let marker = format!("{prefix}{name}/");
                    out.push(Self::summary(marker.clone(), &ent.path()).await?);
                    pending.push(marker);
                } else {
                    out.push(Self::summary(format!("{prefix}{name}"), &ent.path()).await?);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectBackend for LocalFsBackend {
    async fn get_object(&self, key: &str) -> ObjectResult<ObjectReader> {
        let path = self.path_for(key);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(ObjectError::not_found(key)),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ObjectError::not_found(key)),
            Err(e) => return Err(e.into()),
        }
        let f = fs::File::open(path).await?;
        Ok(Box::pin(f))
    }

    async fn put_object(&self, key: &str, data: &[u8]) -> ObjectResult<String> {
        let path = self.path_for(key);
        if key.ends_with('/') {
            fs::create_dir_all(&path).await?;
            return Ok(Self::etag_of(&[]));
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        let mut f = fs::File::create(path).await?;
        f.write_all(data).await?;
        f.flush().await?;
        Ok(Self::etag_of(data))
    }

    async fn delete_object(&self, key: &str) -> ObjectResult<()> {
        let path = self.path_for(key);
        let res = if key.ends_with('/') {
            fs::remove_dir(path).await
        } else {
            fs::remove_file(path).await
        };
        match res {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy_object(&self, src: &str, dst: &str) -> ObjectResult<String> {
        if src.ends_with('/') {
            return self.put_object(dst, &[]).await;
        }
        let data = match fs::read(self.path_for(src)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ObjectError::not_found(src)),
            Err(e) => return Err(e.into()),
        };
        self.put_object(dst, &data).await
    }

    async fn list_objects(&self, prefix: &str, recursive: bool) -> ObjectResult<ObjectListing> {
        let mut listing = ObjectListing::default();
        if recursive {
            let dir = self.path_for(prefix);
            if !prefix.is_empty() && fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()) {
                listing
                    .objects
                    .push(Self::summary(prefix.to_string(), &dir).await?);
            }
            self.walk(prefix.to_string(), &mut listing.objects).await?;
            return Ok(listing);
        }

        let mut rd = match fs::read_dir(self.path_for(prefix)).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound || e.kind() == ErrorKind::NotADirectory => {
                return Ok(listing);
            }
            Err(e) => return Err(e.into()),
        };
        while let Some(ent) = rd.next_entry().await? {
            let name = ent.file_name().to_string_lossy().into_owned();
            if ent.file_type().await?.is_dir() {
                listing.prefixes.push(format!("{prefix}{name}/"));
            } else {
                listing
                    .objects
                    .push(Self::summary(format!("{prefix}{name}"), &ent.path()).await?);
            }
        }
        Ok(listing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_localfs_put_get_list_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());

        let etag = backend.put_object("docs/readme.txt", b"hello").await.unwrap();
        assert_eq!(etag, format!("\"{:x}\"", md5::compute(b"hello")));
        backend.put_object("docs/sub/", &[]).await.unwrap();

        let mut body = backend.get_object("docs/readme.txt").await.unwrap();
        let mut buf = Vec::new();
        body.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");

        let top = backend.list_objects("", false).await.unwrap();
        assert!(top.objects.is_empty());
        assert_eq!(top.prefixes, vec!["docs/".to_string()]);

        let docs = backend.list_objects("docs/", false).await.unwrap();
        assert_eq!(docs.objects.len(), 1);
        assert_eq!(docs.objects[0].key, "docs/readme.txt");
        assert_eq!(docs.objects[0].size, 5);
        assert_eq!(docs.prefixes, vec!["docs/sub/".to_string()]);

        let all = backend.list_objects("docs/", true).await.unwrap();
        let mut keys: Vec<_> = all.objects.iter().map(|o| o.key.as_str()).collect();
        keys.sort();
        assert_eq!(keys, vec!["docs/", "docs/readme.txt", "docs/sub/"]);

        backend.delete_object("docs/readme.txt").await.unwrap();
        backend.delete_object("docs/readme.txt").await.unwrap();
        assert!(
            backend
                .get_object("docs/readme.txt")
                .await
                .err()
                .is_some_and(|e| e.is_not_found())
        );
    }

    #[tokio::test]
    async fn test_localfs_copy_missing_source() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path());
        let err = backend.copy_object("nope", "dst").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
