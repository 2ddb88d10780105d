use std::{
    fmt,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use dashmap::DashMap;
use montage_model::{StoredFile, StoredFileId, UserId};
use tracing::debug;

use super::{ObjectStore, RemoteError, RemoteResult, check_object_path};

/// Object store backed by a directory: `{root}/{bucket}/{path}`.
pub struct LocalObjectStore {
    root: PathBuf,
    known: DashMap<StoredFileId, StoredFile>,
}

impl fmt::Debug for LocalObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalObjectStore")
            .field("root", &self.root)
            .field("known_files", &self.known.len())
            .finish()
    }
}

fn io_failure(action: &str, path: &Path, err: std::io::Error) -> RemoteError {
    let status = match err.kind() {
        std::io::ErrorKind::NotFound => 404,
        std::io::ErrorKind::AlreadyExists => 409,
        std::io::ErrorKind::PermissionDenied => 403,
        _ => 500,
    };
    RemoteError::new(status, format!("{action} {}: {err}", path.display()))
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            known: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `file` lives on disk.
    pub fn path_of(&self, file: &StoredFile) -> PathBuf {
        self.root.join(&file.bucket).join(&file.path)
    }

    /// Files handled by this instance, by id.
    pub fn known_file(&self, id: StoredFileId) -> Option<StoredFile> {
        self.known.get(&id).map(|entry| entry.clone())
    }

    async fn ensure_parent(&self, target: &Path) -> RemoteResult<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| io_failure("create", parent, err))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        source: &Path,
        _owner: Option<UserId>,
    ) -> RemoteResult<StoredFile> {
        check_object_path(bucket)?;
        check_object_path(path)?;

        let file = StoredFile {
            id: StoredFileId::new(),
            bucket: bucket.to_string(),
            path: path.to_string(),
        };
        let target = self.path_of(&file);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return Err(RemoteError::new(
                409,
                format!("{bucket}/{path} already exists"),
            ));
        }
        self.ensure_parent(&target).await?;
        let bytes = tokio::fs::copy(source, &target)
            .await
            .map_err(|err| io_failure("copy to", &target, err))?;

        debug!(bucket, path, bytes, "stored object");
        self.known.insert(file.id, file.clone());
        Ok(file)
    }

    async fn relocate(
        &self,
        file: &StoredFile,
        to_bucket: &str,
    ) -> RemoteResult<StoredFile> {
        check_object_path(to_bucket)?;
        let from = self.path_of(file);
        let moved = StoredFile {
            bucket: to_bucket.to_string(),
            ..file.clone()
        };
        let to = self.path_of(&moved);

        self.ensure_parent(&to).await?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|err| io_failure("move", &from, err))?;

        debug!(
            from = %from.display(),
            to = %to.display(),
            "relocated object"
        );
        self.known.insert(moved.id, moved.clone());
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn files_are_copied_then_moved_between_bucket_dirs() {
        let scratch = tempfile::tempdir().unwrap();
        let source = scratch.path().join("doc.pdf");
        std::fs::write(&source, b"%PDF-1.4").unwrap();

        let root = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(root.path());

        let file = store
            .upload("incoming", "abc/doc_f0.pdf", &source, None)
            .await
            .unwrap();
        assert!(root.path().join("incoming/abc/doc_f0.pdf").exists());

        let moved = store.relocate(&file, "cdn").await.unwrap();
        assert!(!root.path().join("incoming/abc/doc_f0.pdf").exists());
        assert_eq!(std::fs::read(store.path_of(&moved)).unwrap(), b"%PDF-1.4");
        assert_eq!(store.known_file(file.id), Some(moved));
    }

    #[tokio::test]
    async fn relocating_a_missing_file_is_a_not_found() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(root.path());
        let ghost = StoredFile {
            id: StoredFileId::new(),
            bucket: "incoming".into(),
            path: "nope.png".into(),
        };
        let err = store.relocate(&ghost, "cdn").await.unwrap_err();
        assert_eq!(err.status, 404);
    }
}
