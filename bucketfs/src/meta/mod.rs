//! Transactional metadata store
//!
//! Entries live in an embedded SQLite database, one row per entry, grouped by
//! namespace ("bucket"): every directory owns the bucket named after its full
//! path and stores its children there. A single writer connection serializes
//! write transactions; read-only transactions use a second connection and see
//! a WAL snapshot.
//!
//! Submodules:
//! - `entry`: the serialized attribute record

pub mod entry;

pub use entry::Entry;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Namespace holding the root directory's own record.
pub const ROOT_BUCKET: &str = "";
pub const ROOT_NAME: &str = "";

#[derive(Error, Debug)]
pub enum MetaError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("record codec: {0}")]
    Codec(#[from] bincode::Error),

    #[error("store io: {0}")]
    Io(#[from] std::io::Error),

    #[error("write attempted in a read-only transaction")]
    ReadOnly,

    #[error("no such record: {bucket}/{name}")]
    NotFound { bucket: String, name: String },
}

impl MetaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetaError::NotFound { .. })
    }
}

pub type MetaResult<T> = Result<T, MetaError>;

pub struct MetaStore {
    path: PathBuf,
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
}

impl MetaStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> MetaResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let writer = Connection::open(&path)?;
        writer.busy_timeout(Duration::from_secs(5))?;
        writer.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS entries (
                bucket TEXT NOT NULL,
                name TEXT NOT NULL,
                record BLOB NOT NULL,
                PRIMARY KEY (bucket, name)
             ) WITHOUT ROWID;",
        )?;

        let reader = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(Duration::from_secs(5))?;

        debug!(path = %path.display(), "metadata store opened");
        Ok(Self {
            path,
            writer: Arc::new(Mutex::new(writer)),
            reader: Arc::new(Mutex::new(reader)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a transaction. Writable transactions are serialized; dropping
    /// one without `commit` rolls it back.
    pub async fn begin(&self, writable: bool) -> MetaResult<Tx> {
        let conn = if writable {
            self.writer.clone().lock_owned().await
        } else {
            self.reader.clone().lock_owned().await
        };
        conn.execute_batch(if writable { "BEGIN IMMEDIATE" } else { "BEGIN" })?;
        Ok(Tx {
            conn,
            writable,
            done: false,
        })
    }

    /// Run `f` in a writable transaction: commit on `Ok`, roll back on `Err`.
    pub async fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Tx) -> Result<T, E>,
        E: From<MetaError>,
    {
        let mut tx = self.begin(true).await?;
        let out = f(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Run `f` in a read-only transaction.
    pub async fn view<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Tx) -> Result<T, E>,
        E: From<MetaError>,
    {
        let mut tx = self.begin(false).await?;
        let out = f(&mut tx)?;
        tx.commit()?;
        Ok(out)
    }
}

pub struct Tx {
    conn: OwnedMutexGuard<Connection>,
    writable: bool,
    done: bool,
}

impl Tx {
    /// Namespace handle for `name`.
    pub fn bucket<'a>(&'a mut self, name: &str) -> Bucket<'a> {
        Bucket {
            tx: self,
            name: name.to_string(),
        }
    }

    fn check_writable(&self) -> MetaResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(MetaError::ReadOnly)
        }
    }

    /// Move bucket `from` and every bucket below it under `to`.
    pub fn rename_tree(&mut self, from: &str, to: &str) -> MetaResult<usize> {
        self.check_writable()?;
        let n = self.conn.execute(
            "UPDATE entries SET bucket = ?2 || substr(bucket, length(?1) + 1)
             WHERE bucket = ?1 OR substr(bucket, 1, length(?1) + 1) = ?1 || '/'",
            params![from, to],
        )?;
        debug!(from, to, rows = n, "meta.rename_tree");
        Ok(n)
    }

    /// Drop bucket `name` and every bucket below it.
    pub fn drop_tree(&mut self, name: &str) -> MetaResult<usize> {
        self.check_writable()?;
        let n = self.conn.execute(
            "DELETE FROM entries
             WHERE bucket = ?1 OR substr(bucket, 1, length(?1) + 1) = ?1 || '/'",
            params![name],
        )?;
        Ok(n)
    }

    pub fn commit(mut self) -> MetaResult<()> {
        self.conn.execute_batch("COMMIT")?;
        self.done = true;
        Ok(())
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = self.conn.execute_batch("ROLLBACK") {
            warn!(error = %e, "meta: rollback on drop failed");
        }
    }
}

/// One namespace inside a transaction.
pub struct Bucket<'a> {
    tx: &'a mut Tx,
    name: String,
}

impl Bucket<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch `name`, failing with `MetaError::NotFound` when absent.
    pub fn get(&self, name: &str) -> MetaResult<Entry> {
        self.find(name)?.ok_or_else(|| MetaError::NotFound {
            bucket: self.name.clone(),
            name: name.to_string(),
        })
    }

    pub fn find(&self, name: &str) -> MetaResult<Option<Entry>> {
        let raw: Option<Vec<u8>> = self
            .tx
            .conn
            .query_row(
                "SELECT record FROM entries WHERE bucket = ?1 AND name = ?2",
                params![self.name, name],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(Entry::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put(&mut self, name: &str, entry: &Entry) -> MetaResult<()> {
        self.tx.check_writable()?;
        let raw = entry.encode()?;
        self.tx.conn.execute(
            "INSERT OR REPLACE INTO entries (bucket, name, record) VALUES (?1, ?2, ?3)",
            params![self.name, name, raw],
        )?;
        Ok(())
    }

    /// Deleting a missing record succeeds.
    pub fn delete(&mut self, name: &str) -> MetaResult<()> {
        self.tx.check_writable()?;
        self.tx.conn.execute(
            "DELETE FROM entries WHERE bucket = ?1 AND name = ?2",
            params![self.name, name],
        )?;
        Ok(())
    }

    /// All records of this namespace, ordered by name.
    pub fn entries(&self) -> MetaResult<Vec<Entry>> {
        let mut stmt = self
            .tx
            .conn
            .prepare("SELECT record FROM entries WHERE bucket = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![self.name], |row| row.get::<_, Vec<u8>>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(Entry::decode(&raw?)?);
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> MetaResult<bool> {
        let n: i64 = self.tx.conn.query_row(
            "SELECT COUNT(*) FROM entries WHERE bucket = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(n == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(dir: &tempfile::TempDir) -> MetaStore {
        MetaStore::open(dir.path().join("meta.db")).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);

        store
            .update(|tx| -> MetaResult<()> {
                let mut b = tx.bucket("/docs");
                b.put("b.txt", &Entry::file("b.txt", 3, 0o644, 0, 0))?;
                b.put("a.txt", &Entry::file("a.txt", 2, 0o644, 0, 0))?;
                Ok(())
            })
            .await
            .unwrap();

        let mut tx = store.begin(false).await.unwrap();
        let b = tx.bucket("/docs");
        let names: Vec<_> = b.entries().unwrap().into_iter().map(|e| e.path).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(b.get("a.txt").unwrap().inode, 2);
        assert!(b.get("c.txt").unwrap_err().is_not_found());
        assert!(b.find("c.txt").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_update_rolls_back() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);

        let res = store
            .update(|tx| -> MetaResult<()> {
                tx.bucket("/").put("x", &Entry::file("x", 2, 0o644, 0, 0))?;
                Err(MetaError::ReadOnly)
            })
            .await;
        assert!(res.is_err());

        {
            let mut tx = store.begin(true).await.unwrap();
            tx.bucket("/").put("y", &Entry::file("y", 3, 0o644, 0, 0)).unwrap();
            // dropped without commit
        }

        let mut tx = store.begin(false).await.unwrap();
        assert!(tx.bucket("/").is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_read_only_tx_rejects_writes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);
        let mut tx = store.begin(false).await.unwrap();
        let err = tx
            .bucket("/")
            .put("x", &Entry::file("x", 2, 0o644, 0, 0))
            .unwrap_err();
        assert!(matches!(err, MetaError::ReadOnly));
    }

    #[tokio::test]
    async fn test_rename_tree_moves_descendants_only() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);
        store
            .update(|tx| -> MetaResult<()> {
                tx.bucket("/a").put("f", &Entry::file("f", 2, 0o644, 0, 0))?;
                tx.bucket("/a/b").put("g", &Entry::file("g", 3, 0o644, 0, 0))?;
                tx.bucket("/ab").put("h", &Entry::file("h", 4, 0o644, 0, 0))?;
                let n = tx.rename_tree("/a", "/z")?;
                assert_eq!(n, 2);
                Ok(())
            })
            .await
            .unwrap();

        let mut tx = store.begin(false).await.unwrap();
        assert!(tx.bucket("/a").is_empty().unwrap());
        assert_eq!(tx.bucket("/z").get("f").unwrap().inode, 2);
        assert_eq!(tx.bucket("/z/b").get("g").unwrap().inode, 3);
        assert_eq!(tx.bucket("/ab").get("h").unwrap().inode, 4);
    }

    #[tokio::test]
    async fn test_reader_sees_committed_state() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(&tmp);
        store
            .update(|tx| {
                tx.bucket(ROOT_BUCKET)
                    .put(ROOT_NAME, &Entry::dir("", 1, 0o755, 0, 0))
            })
            .await
            .unwrap();
        let mut tx = store.begin(false).await.unwrap();
        assert!(tx.bucket(ROOT_BUCKET).get(ROOT_NAME).unwrap().is_dir());
    }
}
