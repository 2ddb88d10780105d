use std::collections::BTreeMap;

use montage_model::{ContentId, SequenceMember};
use tracing::debug;

use crate::{
    error::{ContentError, Result},
    store::MemberMove,
};

/// Sorted position -> member view of one sequence.
///
/// Every mutation is a single-member move recorded in the order it happened,
/// so the same list can be replayed against the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceLayout {
    sequence_id: ContentId,
    slots: BTreeMap<u32, SequenceMember>,
}

impl SequenceLayout {
    /// Fails when two members claim the same position.
    pub fn from_members(
        sequence_id: ContentId,
        members: impl IntoIterator<Item = SequenceMember>,
    ) -> Result<Self> {
        let mut slots = BTreeMap::new();
        for member in members {
            let position = member.position;
            if let Some(previous) = slots.insert(position, member) {
                return Err(ContentError::Internal(format!(
                    "sequence {sequence_id} has two members at position {position} (one is {})",
                    previous.id
                )));
            }
        }
        Ok(Self { sequence_id, slots })
    }

    pub fn sequence_id(&self) -> ContentId {
        self.sequence_id
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn member_at(&self, position: u32) -> Option<&SequenceMember> {
        self.slots.get(&position)
    }

    pub fn positions(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots.keys().copied()
    }

    pub fn members(&self) -> impl Iterator<Item = &SequenceMember> {
        self.slots.values()
    }

    pub fn into_members(self) -> Vec<SequenceMember> {
        self.slots.into_values().collect()
    }

    /// One past the highest occupied position, or 0.
    pub fn next_position(&self) -> u32 {
        self.slots
            .last_key_value()
            .map_or(0, |(position, _)| position.saturating_add(1))
    }

    /// Positions are exactly `0..len`.
    pub fn is_dense(&self) -> bool {
        self.slots
            .keys()
            .enumerate()
            .all(|(index, position)| u32::try_from(index) == Ok(*position))
    }

    /// Frees `position` by shifting the occupied run starting there up by
    /// one. The highest member of the run moves first.
    pub fn prepare_slot(&mut self, position: u32) -> Result<Vec<MemberMove>> {
        let mut end = position;
        while self.slots.contains_key(&end) {
            end = end.checked_add(1).ok_or_else(|| {
                ContentError::InvalidArgument(format!(
                    "sequence {} has no room above position {position}",
                    self.sequence_id
                ))
            })?;
        }

        let mut moves = Vec::new();
        // `end` is the first free slot; walk the run back down.
        for from in (position..end).rev() {
            moves.push(self.relocate(from, from + 1)?);
        }
        Ok(moves)
    }

    /// Places a member at its own position, which must be free.
    pub fn insert(&mut self, member: SequenceMember) -> Result<()> {
        if member.sequence_id != self.sequence_id {
            return Err(ContentError::InvalidArgument(format!(
                "member {} belongs to sequence {}, not {}",
                member.id, member.sequence_id, self.sequence_id
            )));
        }
        if let Some(occupant) = self.slots.get(&member.position) {
            return Err(ContentError::Internal(format!(
                "position {} of sequence {} is still held by member {}",
                member.position, self.sequence_id, occupant.id
            )));
        }
        self.slots.insert(member.position, member);
        Ok(())
    }

    pub fn remove(&mut self, position: u32) -> Option<SequenceMember> {
        self.slots.remove(&position)
    }

    /// Closes every gap. For each expected position that is empty, the first
    /// occupied slot above it is pulled down into it, so members keep their
    /// relative order and members already in place never move.
    pub fn heal(&mut self) -> Result<Vec<MemberMove>> {
        let mut moves = Vec::new();
        let count = u32::try_from(self.slots.len()).map_err(|_| {
            ContentError::Internal(format!(
                "sequence {} has too many members",
                self.sequence_id
            ))
        })?;

        for expected in 0..count {
            if self.slots.contains_key(&expected) {
                continue;
            }
            let above = self
                .slots
                .range(expected + 1..)
                .next()
                .map(|(position, _)| *position);
            let Some(from) = above else {
                // Fewer members above than gaps below: impossible with
                // unique positions.
                return Err(ContentError::Internal(format!(
                    "sequence {} ran out of members while healing position {expected}",
                    self.sequence_id
                )));
            };
            moves.push(self.relocate(from, expected)?);
        }
        Ok(moves)
    }

    fn relocate(&mut self, from: u32, to: u32) -> Result<MemberMove> {
        let mut member = self.slots.remove(&from).ok_or_else(|| {
            ContentError::Internal(format!(
                "no member at position {from} of sequence {}",
                self.sequence_id
            ))
        })?;
        member.position = to;
        let member_id = member.id;
        if self.slots.insert(to, member).is_some() {
            return Err(ContentError::Internal(format!(
                "position {to} of sequence {} was not free",
                self.sequence_id
            )));
        }
        debug!(sequence = %self.sequence_id, member = %member_id, from, to, "moved member");
        Ok(MemberMove { member_id, from, to })
    }
}
