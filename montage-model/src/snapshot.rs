use serde::{Deserialize, Serialize};

use crate::{content::Content, sequence::SequenceMember};

/// Serializable dump of a content store: every content entity and every
/// sequence association row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub contents: Vec<Content>,
    #[serde(default)]
    pub members: Vec<SequenceMember>,
}
