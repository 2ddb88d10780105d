use montage_model::{Content, ContentId, ContentKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::object_store::RemoteError;

#[derive(Error, Debug)]
pub enum ContentError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Cannot {action} on content {content}: expected {expected} content, found {actual}"
    )]
    VariantMismatch {
        content: ContentId,
        action: String,
        expected: ContentKind,
        actual: ContentKind,
    },

    #[error(
        "Cannot attach '{filename}' to content {content}: extension '{extension}' is not an accepted media type"
    )]
    UnsupportedFileType {
        content: ContentId,
        filename: String,
        extension: String,
    },

    #[error(
        "Cannot add content {content} to sequence {sequence}: no duration given and none can be derived"
    )]
    MissingDuration {
        sequence: ContentId,
        content: ContentId,
    },

    #[error("Sequence {sequence} has no member at position {position}")]
    PositionNotFound { sequence: ContentId, position: u32 },

    #[error("Object store failure: {0}")]
    RemoteStoreFailure(#[from] RemoteError),

    #[error("Permission denied to {action} on content {content}: {reason}")]
    PermissionDenied {
        content: ContentId,
        action: String,
        reason: String,
    },

    #[error("Invalid content reference: {0}")]
    InvalidContent(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Machine readable classification of a [`ContentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    VariantMismatch,
    UnsupportedFileType,
    MissingDuration,
    PositionNotFound,
    RemoteStoreFailure,
    PermissionDenied,
    InvalidContent,
    InvalidArgument,
    AlreadyExists,
    InvalidMedia,
    Io,
    Serialization,
    Internal,
}

impl ContentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContentError::NotFound(_) => ErrorKind::NotFound,
            ContentError::VariantMismatch { .. } => ErrorKind::VariantMismatch,
            ContentError::UnsupportedFileType { .. } => {
                ErrorKind::UnsupportedFileType
            }
            ContentError::MissingDuration { .. } => ErrorKind::MissingDuration,
            ContentError::PositionNotFound { .. } => {
                ErrorKind::PositionNotFound
            }
            ContentError::RemoteStoreFailure(_) => {
                ErrorKind::RemoteStoreFailure
            }
            ContentError::PermissionDenied { .. } => {
                ErrorKind::PermissionDenied
            }
            ContentError::InvalidContent(_) => ErrorKind::InvalidContent,
            ContentError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ContentError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ContentError::InvalidMedia(_) => ErrorKind::InvalidMedia,
            ContentError::Io(_) => ErrorKind::Io,
            #[cfg(feature = "ffmpeg")]
            ContentError::Ffmpeg(_) => ErrorKind::InvalidMedia,
            ContentError::Serialization(_) => ErrorKind::Serialization,
            ContentError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn content_not_found(id: ContentId) -> Self {
        ContentError::NotFound(format!("content {id}"))
    }

    /// Fails with `VariantMismatch` unless `content` is of the `expected` kind.
    pub fn ensure_kind(
        content: &Content,
        expected: ContentKind,
        action: &str,
    ) -> Result<()> {
        if content.kind() == expected {
            Ok(())
        } else {
            Err(ContentError::VariantMismatch {
                content: content.id,
                action: action.to_string(),
                expected,
                actual: content.kind(),
            })
        }
    }
}

pub type Result<T> = std::result::Result<T, ContentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use montage_model::NewContent;

    #[test]
    fn messages_name_the_content_and_the_action() {
        let id = ContentId::new();
        let err = ContentError::VariantMismatch {
            content: id,
            action: "add a member".into(),
            expected: ContentKind::Sequence,
            actual: ContentKind::Media,
        };
        let message = err.to_string();
        assert!(message.contains(&id.to_string()));
        assert!(message.contains("add a member"));
        assert_eq!(err.kind(), ErrorKind::VariantMismatch);
    }

    #[test]
    fn remote_errors_convert_into_store_failures() {
        let err: ContentError = RemoteError::new(503, "unavailable").into();
        assert_eq!(err.kind(), ErrorKind::RemoteStoreFailure);
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn error_kinds_serialize_in_snake_case() {
        let json = serde_json::to_string(&ErrorKind::UnsupportedFileType).unwrap();
        assert_eq!(json, "\"unsupported_file_type\"");
    }

    #[test]
    fn ensure_kind_accepts_matching_variants_only() {
        let now = chrono::Utc::now();
        let new = NewContent::media("clip");
        let content = Content {
            id: ContentId::new(),
            name: new.name,
            bg_color: None,
            body: new.body,
            created_at: now,
            updated_at: now,
        };
        assert!(ContentError::ensure_kind(&content, ContentKind::Media, "upload").is_ok());
        let err = ContentError::ensure_kind(&content, ContentKind::Sequence, "heal")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VariantMismatch);
    }
}
