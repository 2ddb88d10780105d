use std::{
    fmt,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use dashmap::DashMap;
use montage_model::{StoredFile, StoredFileId, UserId};

use super::{ObjectStore, RemoteError, RemoteResult, check_object_path};

/// Bucket/path map kept in memory, with switches to make individual paths
/// fail. Intended for tests and dry runs.
#[derive(Default)]
pub struct InMemoryObjectStore {
    files: DashMap<StoredFileId, StoredObject>,
    upload_failures: DashMap<String, RemoteError>,
    relocate_failures: DashMap<String, RemoteError>,
    upload_calls: AtomicUsize,
}

#[derive(Debug, Clone)]
struct StoredObject {
    file: StoredFile,
    size: u64,
    owner: Option<UserId>,
}

impl fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("files", &self.files.len())
            .field("upload_failures", &self.upload_failures.len())
            .field("relocate_failures", &self.relocate_failures.len())
            .field("upload_calls", &self.upload_calls.load(Ordering::Relaxed))
            .finish()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads whose path contains `pattern` fail with `error`.
    pub fn fail_uploads_matching(
        &self,
        pattern: impl Into<String>,
        error: RemoteError,
    ) {
        self.upload_failures.insert(pattern.into(), error);
    }

    /// Relocations of files whose path contains `pattern` fail with `error`.
    pub fn fail_relocations_matching(
        &self,
        pattern: impl Into<String>,
        error: RemoteError,
    ) {
        self.relocate_failures.insert(pattern.into(), error);
    }

    pub fn clear_failures(&self) {
        self.upload_failures.clear();
        self.relocate_failures.clear();
    }

    pub fn files(&self) -> Vec<StoredFile> {
        let mut files: Vec<StoredFile> =
            self.files.iter().map(|entry| entry.file.clone()).collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files
    }

    pub fn files_in(&self, bucket: &str) -> Vec<StoredFile> {
        self.files()
            .into_iter()
            .filter(|file| file.in_bucket(bucket))
            .collect()
    }

    pub fn size_of(&self, id: StoredFileId) -> Option<u64> {
        self.files.get(&id).map(|entry| entry.size)
    }

    pub fn owner_of(&self, id: StoredFileId) -> Option<UserId> {
        self.files.get(&id).and_then(|entry| entry.owner)
    }

    /// Number of upload attempts, failed ones included.
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::Relaxed)
    }

    fn injected(
        failures: &DashMap<String, RemoteError>,
        path: &str,
    ) -> Option<RemoteError> {
        failures
            .iter()
            .find(|entry| path.contains(entry.key().as_str()))
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        source: &Path,
        owner: Option<UserId>,
    ) -> RemoteResult<StoredFile> {
        self.upload_calls.fetch_add(1, Ordering::Relaxed);
        check_object_path(path)?;
        if let Some(err) = Self::injected(&self.upload_failures, path) {
            return Err(err);
        }

        let size = tokio::fs::metadata(source)
            .await
            .map_err(|err| {
                RemoteError::new(
                    400,
                    format!("cannot read upload source {}: {err}", source.display()),
                )
            })?
            .len();

        let duplicate = self
            .files
            .iter()
            .any(|entry| entry.file.bucket == bucket && entry.file.path == path);
        if duplicate {
            return Err(RemoteError::new(
                409,
                format!("{bucket}/{path} already exists"),
            ));
        }

        let file = StoredFile {
            id: StoredFileId::new(),
            bucket: bucket.to_string(),
            path: path.to_string(),
        };
        self.files.insert(
            file.id,
            StoredObject {
                file: file.clone(),
                size,
                owner,
            },
        );
        Ok(file)
    }

    async fn relocate(
        &self,
        file: &StoredFile,
        to_bucket: &str,
    ) -> RemoteResult<StoredFile> {
        if let Some(err) = Self::injected(&self.relocate_failures, &file.path) {
            return Err(err);
        }

        let mut entry = self
            .files
            .get_mut(&file.id)
            .ok_or_else(|| RemoteError::not_found(format!("stored file {}", file.id)))?;
        if entry.file.bucket != file.bucket {
            return Err(RemoteError::new(
                409,
                format!(
                    "stored file {} is in '{}', not '{}'",
                    file.id, entry.file.bucket, file.bucket
                ),
            ));
        }
        entry.file.bucket = to_bucket.to_string();
        Ok(entry.file.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uploads_and_relocations_track_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("clip.mp4");
        std::fs::write(&source, b"0123456789").unwrap();

        let store = InMemoryObjectStore::new();
        let file = store
            .upload("incoming", "c/clip_f0.mp4", &source, None)
            .await
            .unwrap();
        assert_eq!(store.size_of(file.id), Some(10));

        let moved = store.relocate(&file, "cdn").await.unwrap();
        assert_eq!(moved.id, file.id);
        assert_eq!(store.files_in("cdn"), vec![moved]);
        assert!(store.files_in("incoming").is_empty());
    }

    #[tokio::test]
    async fn injected_failures_are_returned_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.png");
        std::fs::write(&source, b"png").unwrap();

        let store = InMemoryObjectStore::new();
        store.fail_uploads_matching(".thumb_", RemoteError::new(500, "boom"));

        let err = store
            .upload("incoming", "c/a.png.thumb_128.png", &source, None)
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::new(500, "boom"));
        assert!(store.upload("incoming", "c/a.png", &source, None).await.is_ok());
        assert_eq!(store.upload_calls(), 2);
    }

    #[tokio::test]
    async fn same_path_cannot_be_uploaded_twice() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a.png");
        std::fs::write(&source, b"png").unwrap();

        let store = InMemoryObjectStore::new();
        store.upload("incoming", "c/a.png", &source, None).await.unwrap();
        let err = store
            .upload("incoming", "c/a.png", &source, None)
            .await
            .unwrap_err();
        assert_eq!(err.status, 409);
    }
}
