//! Content persistence port.
//!
//! The store owns content entities, their formats and thumbnails, and the
//! association rows of sequences. Everything else in the crate reads and
//! writes through [`ContentStore`].

mod memory;

pub use memory::InMemoryContentStore;

use async_trait::async_trait;
use montage_model::{
    Content, ContentId, ContentKind, Format, FormatId, MemberId, NewContent,
    NewFormat, NewThumbnail, SequenceMember, StoredFileId, StructuredContent,
    Thumbnail,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One member changing position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberMove {
    pub member_id: MemberId,
    pub from: u32,
    pub to: u32,
}

/// Every row change of one sequence edit. Applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceChangeSet {
    pub sequence_id: ContentId,
    pub delete: Option<MemberId>,
    pub insert: Option<SequenceMember>,
    /// Applied in order, after the delete and the insert.
    pub moves: Vec<MemberMove>,
}

impl SequenceChangeSet {
    pub fn new(sequence_id: ContentId) -> Self {
        Self {
            sequence_id,
            delete: None,
            insert: None,
            moves: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_none() && self.insert.is_none() && self.moves.is_empty()
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Loads a content. With `kind` set, a content of another kind is a
    /// `VariantMismatch`.
    async fn get(
        &self,
        id: ContentId,
        kind: Option<ContentKind>,
    ) -> Result<Content>;

    async fn list(&self) -> Result<Vec<Content>>;

    async fn create(&self, new: NewContent) -> Result<Content>;

    /// Members of a sequence ordered by position.
    async fn list_members(
        &self,
        sequence_id: ContentId,
    ) -> Result<Vec<SequenceMember>>;

    /// Applies a change set atomically. Rejects the whole set when any row
    /// is stale or when the resulting positions would collide.
    async fn apply_sequence_changes(
        &self,
        changes: SequenceChangeSet,
    ) -> Result<()>;

    /// Returns the current format index of a media content and increments
    /// it, atomically with respect to other burns on the same content.
    async fn burn_format_index(&self, content_id: ContentId) -> Result<u32>;

    async fn create_format(
        &self,
        content_id: ContentId,
        format: NewFormat,
    ) -> Result<Format>;

    /// Inserts a thumbnail, replacing any existing one of the same size on
    /// the same format.
    async fn upsert_thumbnail(
        &self,
        format_id: FormatId,
        thumbnail: NewThumbnail,
    ) -> Result<Thumbnail>;

    /// Records that a stored file now lives in `bucket`.
    async fn relocate_stored_file(
        &self,
        file_id: StoredFileId,
        bucket: &str,
    ) -> Result<()>;

    async fn set_default_duration(
        &self,
        sequence_id: ContentId,
        default_duration: u64,
    ) -> Result<Content>;

    async fn update_structured(
        &self,
        content_id: ContentId,
        payload: StructuredContent,
    ) -> Result<Content>;
}
