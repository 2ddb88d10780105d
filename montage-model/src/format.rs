//! Concrete realisations of media content and their thumbnails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    duration::DeclaredDuration,
    ids::{ContentId, FormatId, StoredFileId, ThumbnailId},
};

/// Reference to a file held by the object store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: StoredFileId,
    pub bucket: String,
    pub path: String,
}

impl StoredFile {
    pub fn in_bucket(&self, bucket: &str) -> bool {
        self.bucket == bucket
    }
}

/// Where the bytes of a format live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format_class", rename_all = "snake_case")]
pub enum FormatSource {
    /// Backed by a file in the object store.
    File { file: StoredFile },
    /// Published somewhere else and referenced by URI.
    External { uri: String },
}

impl FormatSource {
    pub fn stored_file(&self) -> Option<&StoredFile> {
        match self {
            FormatSource::File { file } => Some(file),
            FormatSource::External { .. } => None,
        }
    }

    pub fn stored_file_mut(&mut self) -> Option<&mut StoredFile> {
        match self {
            FormatSource::File { file } => Some(file),
            FormatSource::External { .. } => None,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            FormatSource::File { .. } => "file_media",
            FormatSource::External { .. } => "external_published",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub id: ThumbnailId,
    pub format_id: FormatId,
    pub width: u32,
    pub height: u32,
    pub file: StoredFile,
}

impl Thumbnail {
    /// `"{width}x{height}"`, the key thumbnails are exported under.
    pub fn size_key(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub id: FormatId,
    pub content_id: ContentId,
    #[serde(flatten)]
    pub source: FormatSource,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub duration: Option<DeclaredDuration>,
    #[serde(default)]
    pub info: serde_json::Value,
    #[serde(default)]
    pub thumbnails: Vec<Thumbnail>,
    pub created_at: DateTime<Utc>,
}

impl Format {
    pub fn thumbnail(&self, width: u32, height: u32) -> Option<&Thumbnail> {
        self.thumbnails
            .iter()
            .find(|thumb| thumb.width == width && thumb.height == height)
    }
}

/// Fields needed to register a new format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFormat {
    #[serde(flatten)]
    pub source: FormatSource,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration: Option<DeclaredDuration>,
    pub info: serde_json::Value,
}

/// Fields needed to register a thumbnail against a format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewThumbnail {
    pub width: u32,
    pub height: u32,
    pub file: StoredFile,
}
