use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use montage_model::{
    Content, ContentBody, ContentId, ContentKind, Format, FormatId, MemberId,
    NewContent, NewFormat, NewThumbnail, SequenceMember, StoreSnapshot,
    StoredFileId, StructuredContent, Thumbnail, ThumbnailId,
};
use tokio::sync::RwLock;

use super::{ContentStore, SequenceChangeSet};
use crate::error::{ContentError, Result};

/// Arena of contents and member rows behind a single lock. Every write
/// happens under the write guard, which makes change sets, index burns and
/// thumbnail upserts atomic.
#[derive(Clone, Default)]
pub struct InMemoryContentStore {
    state: Arc<RwLock<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    contents: HashMap<ContentId, Content>,
    members: HashMap<MemberId, SequenceMember>,
}

impl fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("InMemoryContentStore");
        match self.state.try_read() {
            Ok(state) => {
                debug
                    .field("contents", &state.contents.len())
                    .field("members", &state.members.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl StoreState {
    fn content(&self, id: ContentId) -> Result<&Content> {
        self.contents
            .get(&id)
            .ok_or_else(|| ContentError::content_not_found(id))
    }

    fn content_mut(
        &mut self,
        id: ContentId,
        kind: ContentKind,
        action: &str,
    ) -> Result<&mut Content> {
        let content = self
            .contents
            .get_mut(&id)
            .ok_or_else(|| ContentError::content_not_found(id))?;
        ContentError::ensure_kind(content, kind, action)?;
        content.updated_at = Utc::now();
        Ok(content)
    }

    fn format_mut(&mut self, id: FormatId) -> Result<&mut Format> {
        self.contents
            .values_mut()
            .filter_map(Content::as_media_mut)
            .find_map(|media| media.format_mut(id))
            .ok_or_else(|| ContentError::NotFound(format!("format {id}")))
    }
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store from a snapshot. Rows are taken as they are, including
    /// sequences whose positions have gaps.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let state = StoreState {
            contents: snapshot
                .contents
                .into_iter()
                .map(|content| (content.id, content))
                .collect(),
            members: snapshot
                .members
                .into_iter()
                .map(|member| (member.id, member))
                .collect(),
        };
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Dumps the store, contents sorted by id and members by sequence and
    /// position.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read().await;
        let mut contents: Vec<Content> =
            state.contents.values().cloned().collect();
        contents.sort_by_key(|content| content.id);
        let mut members: Vec<SequenceMember> =
            state.members.values().cloned().collect();
        members.sort_by_key(|member| (member.sequence_id, member.position));
        StoreSnapshot { contents, members }
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn get(
        &self,
        id: ContentId,
        kind: Option<ContentKind>,
    ) -> Result<Content> {
        let state = self.state.read().await;
        let content = state.content(id)?;
        if let Some(kind) = kind {
            ContentError::ensure_kind(content, kind, "load")?;
        }
        Ok(content.clone())
    }

    async fn list(&self) -> Result<Vec<Content>> {
        let state = self.state.read().await;
        let mut contents: Vec<Content> =
            state.contents.values().cloned().collect();
        contents.sort_by_key(|content| content.id);
        Ok(contents)
    }

    async fn create(&self, new: NewContent) -> Result<Content> {
        if let ContentBody::Sequence(sequence) = &new.body
            && sequence.default_duration == 0
        {
            return Err(ContentError::InvalidArgument(format!(
                "sequence '{}' needs a positive default duration",
                new.name
            )));
        }
        let mut state = self.state.write().await;
        let id = new.id.unwrap_or_default();
        if state.contents.contains_key(&id) {
            return Err(ContentError::AlreadyExists(format!("content {id}")));
        }

        let now = Utc::now();
        let content = Content {
            id,
            name: new.name,
            bg_color: new.bg_color,
            body: new.body,
            created_at: now,
            updated_at: now,
        };
        state.contents.insert(id, content.clone());
        Ok(content)
    }

    async fn list_members(
        &self,
        sequence_id: ContentId,
    ) -> Result<Vec<SequenceMember>> {
        let state = self.state.read().await;
        ContentError::ensure_kind(
            state.content(sequence_id)?,
            ContentKind::Sequence,
            "list members",
        )?;
        let mut members: Vec<SequenceMember> = state
            .members
            .values()
            .filter(|member| member.sequence_id == sequence_id)
            .cloned()
            .collect();
        members.sort_by_key(|member| member.position);
        Ok(members)
    }

    async fn apply_sequence_changes(
        &self,
        changes: SequenceChangeSet,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let sequence_id = changes.sequence_id;
        ContentError::ensure_kind(
            state.content(sequence_id)?,
            ContentKind::Sequence,
            "edit members",
        )?;

        // Work on a copy so a rejected set leaves nothing behind.
        let mut working: HashMap<MemberId, SequenceMember> = state
            .members
            .values()
            .filter(|member| member.sequence_id == sequence_id)
            .map(|member| (member.id, member.clone()))
            .collect();

        if let Some(member_id) = changes.delete
            && working.remove(&member_id).is_none()
        {
            return Err(ContentError::NotFound(format!(
                "member {member_id} of sequence {sequence_id}"
            )));
        }

        if let Some(member) = changes.insert {
            if member.sequence_id != sequence_id {
                return Err(ContentError::InvalidArgument(format!(
                    "member {} belongs to sequence {}, not {sequence_id}",
                    member.id, member.sequence_id
                )));
            }
            if !state.contents.contains_key(&member.content_id) {
                return Err(ContentError::InvalidContent(format!(
                    "content {} does not exist",
                    member.content_id
                )));
            }
            if state.members.contains_key(&member.id) {
                return Err(ContentError::AlreadyExists(format!(
                    "member {}",
                    member.id
                )));
            }
            working.insert(member.id, member);
        }

        for step in &changes.moves {
            let member = working.get_mut(&step.member_id).ok_or_else(|| {
                ContentError::Internal(format!(
                    "stale change set: member {} is not in sequence {sequence_id}",
                    step.member_id
                ))
            })?;
            if member.position != step.from {
                return Err(ContentError::Internal(format!(
                    "stale change set: member {} is at {}, expected {}",
                    step.member_id, member.position, step.from
                )));
            }
            member.position = step.to;
        }

        let mut taken = HashSet::with_capacity(working.len());
        if let Some(clash) =
            working.values().find(|member| !taken.insert(member.position))
        {
            return Err(ContentError::Internal(format!(
                "sequence {sequence_id} would hold two members at position {}",
                clash.position
            )));
        }

        state
            .members
            .retain(|_, member| member.sequence_id != sequence_id);
        state.members.extend(working);
        if let Some(sequence) = state.contents.get_mut(&sequence_id) {
            sequence.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn burn_format_index(&self, content_id: ContentId) -> Result<u32> {
        let mut state = self.state.write().await;
        let content = state.content_mut(
            content_id,
            ContentKind::Media,
            "reserve a format index",
        )?;
        let ContentBody::Media(media) = &mut content.body else {
            return Err(ContentError::Internal(format!(
                "content {content_id} lost its media body"
            )));
        };
        let index = media.fidx;
        media.fidx = index.checked_add(1).ok_or_else(|| {
            ContentError::Internal(format!(
                "format index of content {content_id} is exhausted"
            ))
        })?;
        Ok(index)
    }

    async fn create_format(
        &self,
        content_id: ContentId,
        format: NewFormat,
    ) -> Result<Format> {
        let mut state = self.state.write().await;
        let content =
            state.content_mut(content_id, ContentKind::Media, "add a format")?;
        let ContentBody::Media(media) = &mut content.body else {
            return Err(ContentError::Internal(format!(
                "content {content_id} lost its media body"
            )));
        };

        let created = Format {
            id: FormatId::new(),
            content_id,
            source: format.source,
            width: format.width,
            height: format.height,
            duration: format.duration,
            info: format.info,
            thumbnails: Vec::new(),
            created_at: Utc::now(),
        };
        media.formats.push(created.clone());
        Ok(created)
    }

    async fn upsert_thumbnail(
        &self,
        format_id: FormatId,
        thumbnail: NewThumbnail,
    ) -> Result<Thumbnail> {
        let mut state = self.state.write().await;
        let format = state.format_mut(format_id)?;

        if let Some(existing) = format.thumbnails.iter_mut().find(|thumb| {
            thumb.width == thumbnail.width && thumb.height == thumbnail.height
        }) {
            existing.file = thumbnail.file;
            return Ok(existing.clone());
        }

        let created = Thumbnail {
            id: ThumbnailId::new(),
            format_id,
            width: thumbnail.width,
            height: thumbnail.height,
            file: thumbnail.file,
        };
        format.thumbnails.push(created.clone());
        Ok(created)
    }

    async fn relocate_stored_file(
        &self,
        file_id: StoredFileId,
        bucket: &str,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        for media in state.contents.values_mut().filter_map(Content::as_media_mut)
        {
            for format in &mut media.formats {
                if let Some(file) = format.source.stored_file_mut()
                    && file.id == file_id
                {
                    file.bucket = bucket.to_string();
                    return Ok(());
                }
                if let Some(thumb) = format
                    .thumbnails
                    .iter_mut()
                    .find(|thumb| thumb.file.id == file_id)
                {
                    thumb.file.bucket = bucket.to_string();
                    return Ok(());
                }
            }
        }
        Err(ContentError::NotFound(format!("stored file {file_id}")))
    }

    async fn set_default_duration(
        &self,
        sequence_id: ContentId,
        default_duration: u64,
    ) -> Result<Content> {
        if default_duration == 0 {
            return Err(ContentError::InvalidArgument(
                "default duration must be positive".to_string(),
            ));
        }
        let mut state = self.state.write().await;
        let content = state.content_mut(
            sequence_id,
            ContentKind::Sequence,
            "set the default duration",
        )?;
        if let ContentBody::Sequence(sequence) = &mut content.body {
            sequence.default_duration = default_duration;
        }
        Ok(content.clone())
    }

    async fn update_structured(
        &self,
        content_id: ContentId,
        payload: StructuredContent,
    ) -> Result<Content> {
        let mut state = self.state.write().await;
        let content = state.content_mut(
            content_id,
            ContentKind::Structured,
            "store generated content",
        )?;
        content.body = ContentBody::Structured(payload);
        Ok(content.clone())
    }
}
