use serde::{Deserialize, Serialize};

use crate::{
    duration::DeclaredDuration,
    ids::{ContentId, MemberId},
};

/// One slot in a sequence: the association between a sequence and the
/// content played at `position`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceMember {
    pub id: MemberId,
    pub sequence_id: ContentId,
    pub content_id: ContentId,
    pub position: u32,
    /// Optional override; sign-semantic like format durations.
    #[serde(default)]
    pub duration: Option<DeclaredDuration>,
}
