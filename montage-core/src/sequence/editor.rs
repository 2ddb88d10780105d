use std::{fmt, sync::Arc};

use dashmap::DashMap;
use montage_model::{
    Content, ContentId, ContentKind, DeclaredDuration, MemberId,
    SequenceMember,
};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::SequenceLayout;
use crate::{
    duration::DurationEstimator,
    error::{ContentError, ErrorKind, Result},
    store::{ContentStore, MemberMove, SequenceChangeSet},
};

/// Applies membership edits to sequences. Edits of the same sequence are
/// serialised; each one is read, planned on a [`SequenceLayout`] and
/// committed as one change set.
#[derive(Clone)]
pub struct SequenceEditor {
    store: Arc<dyn ContentStore>,
    estimator: DurationEstimator,
    locks: Arc<DashMap<ContentId, Arc<Mutex<()>>>>,
}

impl fmt::Debug for SequenceEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceEditor")
            .field("estimator", &self.estimator)
            .field("locked_sequences", &self.locks.len())
            .finish()
    }
}

impl SequenceEditor {
    pub fn new(store: Arc<dyn ContentStore>, estimator: DurationEstimator) -> Self {
        Self {
            store,
            estimator,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Waits for exclusive use of `sequence_id`. The lock entry goes away
    /// with the last guard, so the map only holds sequences being edited.
    async fn lock(&self, sequence_id: ContentId) -> EditGuard<'_> {
        let lock = self.locks.entry(sequence_id).or_default().clone();
        let guard = lock.lock_owned().await;
        EditGuard {
            locks: &self.locks,
            sequence_id,
            guard: Some(guard),
        }
    }

    async fn sequence(&self, sequence_id: ContentId, action: &str) -> Result<Content> {
        let sequence = self.store.get(sequence_id, None).await?;
        ContentError::ensure_kind(&sequence, ContentKind::Sequence, action)?;
        Ok(sequence)
    }

    async fn layout(&self, sequence_id: ContentId) -> Result<SequenceLayout> {
        let members = self.store.list_members(sequence_id).await?;
        SequenceLayout::from_members(sequence_id, members)
    }

    /// Members ordered by position.
    pub async fn members(&self, sequence_id: ContentId) -> Result<Vec<SequenceMember>> {
        self.sequence(sequence_id, "list members").await?;
        self.store.list_members(sequence_id).await
    }

    pub async fn next_position(&self, sequence_id: ContentId) -> Result<u32> {
        self.sequence(sequence_id, "find the next position").await?;
        Ok(self.layout(sequence_id).await?.next_position())
    }

    /// Adds `content_id` to the sequence. Without a position the member is
    /// appended; with one, the members from that position upward shift up.
    /// Without a duration the content's own estimate is used.
    pub async fn add_member(
        &self,
        sequence_id: ContentId,
        content_id: ContentId,
        position: Option<u32>,
        duration: Option<DeclaredDuration>,
    ) -> Result<SequenceMember> {
        let _guard = self.lock(sequence_id).await;

        self.sequence(sequence_id, "add a member").await?;
        match self.store.get(content_id, None).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(ContentError::InvalidContent(format!(
                    "content {content_id} cannot be added to sequence {sequence_id}: it does not exist"
                )));
            }
            Err(err) => return Err(err),
        }

        let duration = match duration {
            Some(duration) => duration,
            None => self
                .estimator
                .estimate(self.store.as_ref(), content_id)
                .await?
                .map(DeclaredDuration::exact_ms)
                .ok_or(ContentError::MissingDuration {
                    sequence: sequence_id,
                    content: content_id,
                })?,
        };

        let mut layout = self.layout(sequence_id).await?;
        let mut changes = SequenceChangeSet::new(sequence_id);
        let position = match position {
            Some(position) => {
                changes.moves.extend(layout.prepare_slot(position)?);
                position
            }
            None => layout.next_position(),
        };

        let member = SequenceMember {
            id: MemberId::new(),
            sequence_id,
            content_id,
            position,
            duration: Some(duration),
        };
        layout.insert(member.clone())?;
        changes.insert = Some(member.clone());
        let healing = layout.heal()?;
        changes.moves.extend(healing);

        // Healing may have pulled the new member down.
        let placed = layout
            .members()
            .find(|candidate| candidate.id == member.id)
            .cloned()
            .unwrap_or(member);

        self.store.apply_sequence_changes(changes).await?;
        info!(
            sequence = %sequence_id,
            content = %content_id,
            position = placed.position,
            "added sequence member"
        );
        Ok(placed)
    }

    /// Removes the member at `position` and closes the gap it leaves.
    pub async fn remove_member(
        &self,
        sequence_id: ContentId,
        position: u32,
    ) -> Result<SequenceMember> {
        let _guard = self.lock(sequence_id).await;

        self.sequence(sequence_id, "remove a member").await?;
        let mut layout = self.layout(sequence_id).await?;
        let removed = layout.remove(position).ok_or(ContentError::PositionNotFound {
            sequence: sequence_id,
            position,
        })?;

        let mut changes = SequenceChangeSet::new(sequence_id);
        changes.delete = Some(removed.id);
        changes.moves = layout.heal()?;

        self.store.apply_sequence_changes(changes).await?;
        info!(
            sequence = %sequence_id,
            content = %removed.content_id,
            position,
            "removed sequence member"
        );
        Ok(removed)
    }

    /// Restores positions `0..count` and returns the moves it took.
    pub async fn heal_positions(&self, sequence_id: ContentId) -> Result<Vec<MemberMove>> {
        let _guard = self.lock(sequence_id).await;

        self.sequence(sequence_id, "heal positions").await?;
        let mut layout = self.layout(sequence_id).await?;
        let moves = layout.heal()?;
        if moves.is_empty() {
            return Ok(moves);
        }

        let mut changes = SequenceChangeSet::new(sequence_id);
        changes.moves = moves.clone();
        self.store.apply_sequence_changes(changes).await?;
        debug!(sequence = %sequence_id, moves = moves.len(), "healed sequence positions");
        Ok(moves)
    }

    pub async fn set_default_duration(
        &self,
        sequence_id: ContentId,
        default_duration: u64,
    ) -> Result<Content> {
        let _guard = self.lock(sequence_id).await;
        self.store
            .set_default_duration(sequence_id, default_duration)
            .await
    }
}

struct EditGuard<'a> {
    locks: &'a DashMap<ContentId, Arc<Mutex<()>>>,
    sequence_id: ContentId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EditGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        // Waiters hold their own clone, so a count of one means nobody does.
        self.locks
            .remove_if(&self.sequence_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
