//! Data model definitions shared across Montage crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod content;
pub mod duration;
pub mod error;
pub mod format;
pub mod ids;
pub mod progress;
pub mod sequence;
pub mod snapshot;

pub use content::{
    Content, ContentBody, ContentKind, DEFAULT_SEQUENCE_DURATION_MS,
    MediaContent, NewContent, SequenceContent, StructuredContent,
};
pub use duration::{DeclaredDuration, DurationHint};
pub use error::{ModelError, Result as ModelResult};
pub use format::{
    Format, FormatSource, NewFormat, NewThumbnail, StoredFile, Thumbnail,
};
pub use ids::{
    ContentId, FormatId, MemberId, StoredFileId, ThumbnailId, TokenId, UserId,
};
pub use progress::{OpenToken, ProgressToken, TokenState, TokenUpdate};
pub use sequence::SequenceMember;
pub use snapshot::StoreSnapshot;
