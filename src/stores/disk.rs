//! Payload storage on the local filesystem.
//!
//! Payloads are sharded beneath `base_path/{shard}/{shard}/{id}` where the
//! shards are the first two bytes of MD5(id). Writes land in a temp file in
//! the same directory, are fsynced, and are renamed into place, so a reader
//! never sees a partially written payload under its final name. A write that
//! is abandoned unlinks its temp file; temp files orphaned by a crash are
//! removed by `list_stored_before` once they are older than the cutoff.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File, ReadDir},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

use super::{BlobStore, StoreError, StoreResult};

/// Name prefix of in-flight writes.
const TEMP_PREFIX: &str = ".tmp-";

#[derive(Clone, Debug)]
pub struct DiskBlobStore {
    /// Base directory on disk where payloads are stored.
    base_path: PathBuf,
}

impl DiskBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Two-level shard identifiers for an id, as lowercase hex (00–ff).
    fn shards(id: Uuid) -> (String, String) {
        let digest = md5::compute(id.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path. Parent directories may not exist yet.
    fn blob_path(&self, id: Uuid) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(id);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(id.to_string());
        path
    }

    /// Remove empty shard directories from `start` up to (not including) `stop`.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// `read_dir` that treats a vanished directory as empty. Shard directories are
/// pruned concurrently by deletes.
async fn read_dir_if_present(path: &Path) -> io::Result<Option<ReadDir>> {
    match fs::read_dir(path).await {
        Ok(dir) => Ok(Some(dir)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

async fn remove_stale_temp(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("removed stale temp file {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => debug!("failed to remove stale temp file {}: {}", path.display(), err),
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn put(&self, id: Uuid, data: Bytes) -> StoreResult<()> {
        let file_path = self.blob_path(id);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StoreError::Io(io::Error::new(
                ErrorKind::Other,
                "blob path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        // The temp path is unlinked on drop, so a put that errors or is
        // cancelled mid-write leaves nothing behind.
        let (file, tmp_path) = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&parent)?
            .into_parts();
        let mut file = File::from_std(file);
        file.write_all(&data).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tmp_path
            .persist(&file_path)
            .map_err(|err| StoreError::Io(err.error))?;

        debug!(%id, bytes = data.len(), "wrote blob {}", file_path.display());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Bytes> {
        let file_path = self.blob_path(id);
        match fs::read(&file_path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(id)),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn exists(&self, id: Uuid) -> StoreResult<bool> {
        Ok(fs::try_exists(self.blob_path(id)).await?)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let file_path = self.blob_path(id);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed blob file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    async fn list_stored_before(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<Uuid>> {
        let mut found = Vec::new();
        if limit == 0 {
            return Ok(found);
        }
        let Some(mut shard_a) = read_dir_if_present(&self.base_path).await? else {
            return Ok(found);
        };

        while let Some(a) = shard_a.next_entry().await? {
            if !a.file_type().await?.is_dir() {
                continue;
            }
            let Some(mut shard_b) = read_dir_if_present(&a.path()).await? else {
                continue;
            };
            while let Some(b) = shard_b.next_entry().await? {
                if !b.file_type().await?.is_dir() {
                    continue;
                }
                let Some(mut files) = read_dir_if_present(&b.path()).await? else {
                    continue;
                };
                while let Some(entry) = files.next_entry().await? {
                    let name = entry.file_name();
                    let Some(name) = name.to_str() else {
                        continue;
                    };
                    let modified = match entry.metadata().await {
                        Ok(meta) => DateTime::<Utc>::from(meta.modified()?),
                        Err(err) if err.kind() == ErrorKind::NotFound => continue,
                        Err(err) => return Err(StoreError::Io(err)),
                    };

                    // left behind by a process that died mid-write
                    if name.starts_with(TEMP_PREFIX) {
                        if modified < cutoff {
                            remove_stale_temp(&entry.path()).await;
                        }
                        continue;
                    }

                    let Ok(id) = Uuid::parse_str(name) else {
                        continue;
                    };
                    if modified < cutoff {
                        found.push(id);
                        if found.len() >= limit {
                            return Ok(found);
                        }
                    }
                }
            }
        }

        Ok(found)
    }

    /// Write, read back, and delete a probe file under `base_path`.
    async fn health_check(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.base_path).await?;
        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "probe file content mismatch",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        let id = Uuid::new_v4();

        store.put(id, Bytes::from_static(b"hello blob")).await.unwrap();
        assert!(store.exists(id).await.unwrap());
        assert_eq!(store.get(id).await.unwrap(), Bytes::from_static(b"hello blob"));

        store.delete(id).await.unwrap();
        assert!(!store.exists(id).await.unwrap());
        assert!(matches!(store.get(id).await, Err(StoreError::NotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes_shards() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        let id = Uuid::new_v4();

        store.put(id, Bytes::from_static(b"x")).await.unwrap();
        store.delete(id).await.unwrap();
        store.delete(id).await.unwrap();

        let mut entries = fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    async fn names_in(dir: &Path) -> Vec<String> {
        let mut entries = fs::read_dir(dir).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names
    }

    #[tokio::test]
    async fn leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        let id = Uuid::new_v4();
        store.put(id, Bytes::from(vec![7u8; 4096])).await.unwrap();

        let parent = store.blob_path(id).parent().unwrap().to_path_buf();
        assert_eq!(names_in(&parent).await, vec![id.to_string()]);
    }

    #[tokio::test]
    async fn put_replaces_an_existing_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        let id = Uuid::new_v4();

        store.put(id, Bytes::from_static(b"first")).await.unwrap();
        store.put(id, Bytes::from_static(b"second")).await.unwrap();
        assert_eq!(store.get(id).await.unwrap(), Bytes::from_static(b"second"));

        let parent = store.blob_path(id).parent().unwrap().to_path_buf();
        assert_eq!(names_in(&parent).await, vec![id.to_string()]);
    }

    #[tokio::test]
    async fn dropped_put_removes_its_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        let id = Uuid::new_v4();
        let parent = store.blob_path(id).parent().unwrap().to_path_buf();

        let mut put = Box::pin(store.put(id, Bytes::from(vec![1u8; 32 * 1024 * 1024])));
        loop {
            assert!(futures::poll!(put.as_mut()).is_pending());
            if fs::try_exists(&parent).await.unwrap()
                && names_in(&parent).await.iter().any(|n| n.starts_with(TEMP_PREFIX))
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
        drop(put);

        assert!(names_in(&parent).await.is_empty());
        assert!(!store.exists(id).await.unwrap());
    }

    #[tokio::test]
    async fn listing_removes_stale_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        let id = Uuid::new_v4();
        store.put(id, Bytes::from_static(b"kept")).await.unwrap();
        let parent = store.blob_path(id).parent().unwrap().to_path_buf();
        let stale = parent.join(format!("{TEMP_PREFIX}crashed"));
        fs::write(&stale, b"partial").await.unwrap();

        let past = Utc::now() - TimeDelta::hours(1);
        store.list_stored_before(past, 10).await.unwrap();
        assert!(fs::try_exists(&stale).await.unwrap());

        let future = Utc::now() + TimeDelta::hours(1);
        let listed = store.list_stored_before(future, 10).await.unwrap();
        assert_eq!(listed, vec![id]);
        assert!(!fs::try_exists(&stale).await.unwrap());
    }

    #[tokio::test]
    async fn lists_only_blobs_older_than_cutoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path());
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            store.put(*id, Bytes::from_static(b"payload")).await.unwrap();
        }

        let past = Utc::now() - TimeDelta::hours(1);
        assert!(store.list_stored_before(past, 10).await.unwrap().is_empty());

        let future = Utc::now() + TimeDelta::hours(1);
        let mut listed = store.list_stored_before(future, 10).await.unwrap();
        listed.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(listed, expected);

        assert_eq!(store.list_stored_before(future, 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn health_check_leaves_directory_clean() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBlobStore::new(dir.path().join("blobs"));
        store.health_check().await.unwrap();

        let mut entries = fs::read_dir(store.base_path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
