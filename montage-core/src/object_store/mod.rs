//! Object storage port and adapters.
//!
//! Files live in named buckets under caller-chosen paths. The pipeline only
//! ever uploads into the upload bucket; publication relocates them.

mod local;
mod memory;

pub use local::LocalObjectStore;
pub use memory::InMemoryObjectStore;

use std::path::Path;

use async_trait::async_trait;
use montage_model::{StoredFile, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an object store, carrying what the remote said.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("object store responded with {status}: {body}")]
pub struct RemoteError {
    pub status: u16,
    pub body: String,
}

impl RemoteError {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::new(404, format!("{what} does not exist"))
    }

    /// `{"code": status, "content": body}`. The body is embedded as JSON when
    /// it parses as JSON, otherwise as a string.
    pub fn to_payload(&self) -> serde_json::Value {
        let content = serde_json::from_str::<serde_json::Value>(&self.body)
            .unwrap_or_else(|_| serde_json::Value::String(self.body.clone()));
        serde_json::json!({ "code": self.status, "content": content })
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores the file at `source` as `path` inside `bucket`.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        source: &Path,
        owner: Option<UserId>,
    ) -> RemoteResult<StoredFile>;

    /// Moves a stored file into `to_bucket`, keeping its id and path.
    async fn relocate(
        &self,
        file: &StoredFile,
        to_bucket: &str,
    ) -> RemoteResult<StoredFile>;
}

/// Rejects object paths that could escape their bucket.
pub(crate) fn check_object_path(path: &str) -> RemoteResult<()> {
    let escapes = path.is_empty()
        || path.starts_with('/')
        || path.split(['/', '\\']).any(|part| part == "..");
    if escapes {
        return Err(RemoteError::new(400, format!("invalid object path '{path}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_embeds_json_bodies() {
        let err = RemoteError::new(507, r#"{"detail": "quota exceeded"}"#);
        let payload = err.to_payload();
        assert_eq!(payload["code"], 507);
        assert_eq!(payload["content"]["detail"], "quota exceeded");

        let plain = RemoteError::new(502, "bad gateway").to_payload();
        assert_eq!(plain["content"], "bad gateway");
    }

    #[test]
    fn object_paths_may_not_escape() {
        assert!(check_object_path("abc/clip_f0.mp4").is_ok());
        assert!(check_object_path("../etc/passwd").is_err());
        assert!(check_object_path("/abs").is_err());
        assert!(check_object_path("").is_err());
    }
}
