//! The polymorphic content entity.
//!
//! Every content is exactly one of three variants, chosen at creation and
//! never changed afterwards. The variant carries only its own fields; ties to
//! other contents (sequence payloads) are ids resolved through a store.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::ModelError,
    format::{Format, StoredFile},
    ids::{ContentId, FormatId},
};

/// Discriminator tag for the content variants.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Media,
    Structured,
    Sequence,
}

impl ContentKind {
    pub const ALL: [ContentKind; 3] =
        [ContentKind::Media, ContentKind::Structured, ContentKind::Sequence];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Media => "media",
            ContentKind::Structured => "structured",
            ContentKind::Sequence => "sequence",
        }
    }

    /// Human readable name used in listings of accepted kinds.
    pub fn display_name(self) -> &'static str {
        match self {
            ContentKind::Media => "Media File(s)",
            ContentKind::Structured => "Device Generated Content",
            ContentKind::Sequence => "Content Sequence",
        }
    }

    /// Only media content can have real files attached to it.
    pub fn allows_actual_media(self) -> bool {
        matches!(self, ContentKind::Media)
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "media" => Ok(ContentKind::Media),
            "structured" => Ok(ContentKind::Structured),
            "sequence" => Ok(ContentKind::Sequence),
            _ => Err(ModelError::UnknownContentKind(s.to_string())),
        }
    }
}

/// Media content: zero or more formats plus the filename counter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaContent {
    /// Monotonic counter burned once per upload attempt. Never reused, so
    /// it may have gaps.
    #[serde(default)]
    pub fidx: u32,
    #[serde(default)]
    pub formats: Vec<Format>,
}

impl MediaContent {
    pub fn format(&self, id: FormatId) -> Option<&Format> {
        self.formats.iter().find(|format| format.id == id)
    }

    pub fn format_mut(&mut self, id: FormatId) -> Option<&mut Format> {
        self.formats.iter_mut().find(|format| format.id == id)
    }

    /// Every stored file owned by this content, formats first, then their
    /// thumbnails.
    pub fn stored_files(&self) -> impl Iterator<Item = &StoredFile> {
        self.formats.iter().flat_map(|format| {
            format
                .source
                .stored_file()
                .into_iter()
                .chain(format.thumbnails.iter().map(|thumb| &thumb.file))
        })
    }
}

/// Device generated content: an opaque generator path and its arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredContent {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// An ordered sequence of other contents. The members themselves are
/// association rows held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceContent {
    /// Milliseconds; always positive.
    pub default_duration: u64,
}

impl Default for SequenceContent {
    fn default() -> Self {
        Self {
            default_duration: DEFAULT_SEQUENCE_DURATION_MS,
        }
    }
}

/// Default for [`SequenceContent::default_duration`].
pub const DEFAULT_SEQUENCE_DURATION_MS: u64 = 10_000;

/// Variant payload of a [`Content`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "content_type", rename_all = "snake_case")]
pub enum ContentBody {
    Media(MediaContent),
    Structured(StructuredContent),
    Sequence(SequenceContent),
}

impl ContentBody {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentBody::Media(_) => ContentKind::Media,
            ContentBody::Structured(_) => ContentKind::Structured,
            ContentBody::Sequence(_) => ContentKind::Sequence,
        }
    }

    /// An empty body of the given kind.
    pub fn empty(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Media => ContentBody::Media(MediaContent::default()),
            ContentKind::Structured => {
                ContentBody::Structured(StructuredContent::default())
            }
            ContentKind::Sequence => {
                ContentBody::Sequence(SequenceContent::default())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub id: ContentId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
    #[serde(flatten)]
    pub body: ContentBody,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Content {
    pub fn kind(&self) -> ContentKind {
        self.body.kind()
    }

    pub fn as_media(&self) -> Option<&MediaContent> {
        match &self.body {
            ContentBody::Media(media) => Some(media),
            _ => None,
        }
    }

    pub fn as_media_mut(&mut self) -> Option<&mut MediaContent> {
        match &mut self.body {
            ContentBody::Media(media) => Some(media),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&StructuredContent> {
        match &self.body {
            ContentBody::Structured(structured) => Some(structured),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceContent> {
        match &self.body {
            ContentBody::Sequence(sequence) => Some(sequence),
            _ => None,
        }
    }
}

/// Request to create a content entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewContent {
    /// Caller-chosen id; a fresh one is minted when absent.
    #[serde(default)]
    pub id: Option<ContentId>,
    pub name: String,
    #[serde(default)]
    pub bg_color: Option<String>,
    #[serde(flatten)]
    pub body: ContentBody,
}

impl NewContent {
    pub fn new(name: impl Into<String>, kind: ContentKind) -> Self {
        Self {
            id: None,
            name: name.into(),
            bg_color: None,
            body: ContentBody::empty(kind),
        }
    }

    pub fn media(name: impl Into<String>) -> Self {
        Self::new(name, ContentKind::Media)
    }

    pub fn structured(
        name: impl Into<String>,
        path: impl Into<String>,
        args: serde_json::Value,
    ) -> Self {
        Self {
            body: ContentBody::Structured(StructuredContent {
                path: Some(path.into()),
                args,
            }),
            ..Self::new(name, ContentKind::Structured)
        }
    }

    pub fn sequence(name: impl Into<String>, default_duration: u64) -> Self {
        Self {
            body: ContentBody::Sequence(SequenceContent { default_duration }),
            ..Self::new(name, ContentKind::Sequence)
        }
    }

    pub fn with_id(mut self, id: ContentId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn kind(&self) -> ContentKind {
        self.body.kind()
    }
}
