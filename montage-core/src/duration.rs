//! Playback duration estimates.
//!
//! Estimation runs in two phases. [`ContentGraph::load`] pulls every content
//! and member list reachable from a root out of the store, then the
//! estimator computes over that arena without touching the store again.

use std::collections::{HashMap, HashSet, VecDeque};

use montage_model::{
    Content, ContentBody, ContentId, DeclaredDuration, DurationHint, Format,
    SequenceContent, SequenceMember, StoreSnapshot,
};
use tracing::debug;

use crate::{config::DurationConfig, error::Result, store::ContentStore};

/// Contents and sequence member lists keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ContentGraph {
    contents: HashMap<ContentId, Content>,
    members: HashMap<ContentId, Vec<SequenceMember>>,
}

impl ContentGraph {
    /// Loads `root` and everything reachable from it. A missing root is an
    /// error; a member pointing at a missing content is simply left out and
    /// estimates as unknown.
    pub async fn load(
        store: &dyn ContentStore,
        root: ContentId,
    ) -> Result<Self> {
        let mut graph = Self::default();
        let root_content = store.get(root, None).await?;
        let mut queue = VecDeque::from([root_content]);

        while let Some(content) = queue.pop_front() {
            let id = content.id;
            let is_sequence = matches!(content.body, ContentBody::Sequence(_));
            graph.contents.insert(id, content);
            if !is_sequence {
                continue;
            }

            let members = store.list_members(id).await?;
            for member in &members {
                let payload = member.content_id;
                if graph.contents.contains_key(&payload)
                    || queue.iter().any(|queued| queued.id == payload)
                {
                    continue;
                }
                match store.get(payload, None).await {
                    Ok(content) => queue.push_back(content),
                    Err(err) => {
                        debug!(
                            sequence = %id,
                            content = %payload,
                            error = %err,
                            "member payload unavailable, estimating as unknown"
                        );
                    }
                }
            }
            graph.members.insert(id, members);
        }

        Ok(graph)
    }

    pub fn from_snapshot(snapshot: &StoreSnapshot) -> Self {
        let contents = snapshot
            .contents
            .iter()
            .map(|content| (content.id, content.clone()))
            .collect();
        let mut members: HashMap<ContentId, Vec<SequenceMember>> =
            HashMap::new();
        for member in &snapshot.members {
            members
                .entry(member.sequence_id)
                .or_default()
                .push(member.clone());
        }
        for list in members.values_mut() {
            list.sort_by_key(|member| member.position);
        }
        Self { contents, members }
    }

    pub fn content(&self, id: ContentId) -> Option<&Content> {
        self.contents.get(&id)
    }

    pub fn members(&self, sequence_id: ContentId) -> &[SequenceMember] {
        self.members
            .get(&sequence_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DurationEstimator {
    config: DurationConfig,
}

impl DurationEstimator {
    pub fn new(config: DurationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DurationConfig {
        &self.config
    }

    /// Loads the graph under `id` and estimates it. `None` means the content
    /// has no intrinsic duration.
    pub async fn estimate(
        &self,
        store: &dyn ContentStore,
        id: ContentId,
    ) -> Result<Option<u64>> {
        let graph = ContentGraph::load(store, id).await?;
        Ok(self.estimate_in(&graph, id))
    }

    /// Pure estimate over an already loaded graph.
    pub fn estimate_in(&self, graph: &ContentGraph, id: ContentId) -> Option<u64> {
        let mut path = HashSet::new();
        self.estimate_content(graph, id, &mut path)
    }

    /// A single format: literal when exact, scaled when a step count, the
    /// unknown fallback when absent.
    pub fn format_estimate(&self, format: &Format) -> u64 {
        match format.duration.map(DeclaredDuration::hint) {
            None => self.config.unknown_format_ms,
            Some(DurationHint::Exact(ms)) => ms,
            Some(DurationHint::Steps(steps)) => {
                steps.saturating_mul(self.config.step_ms)
            }
        }
    }

    /// A member's own duration. Steps are measured in the sequence's default
    /// duration with padding between consecutive steps.
    pub fn member_estimate(
        &self,
        duration: DeclaredDuration,
        sequence: &SequenceContent,
    ) -> u64 {
        match duration.hint() {
            DurationHint::Exact(ms) => ms,
            DurationHint::Steps(steps) => steps
                .saturating_mul(sequence.default_duration)
                .saturating_add(
                    steps
                        .saturating_sub(1)
                        .saturating_mul(self.config.step_padding_ms),
                ),
        }
    }

    fn estimate_content(
        &self,
        graph: &ContentGraph,
        id: ContentId,
        path: &mut HashSet<ContentId>,
    ) -> Option<u64> {
        let content = graph.content(id)?;
        match &content.body {
            ContentBody::Structured(_) => None,
            ContentBody::Media(media) => media
                .formats
                .iter()
                .map(|format| self.format_estimate(format))
                .max(),
            ContentBody::Sequence(sequence) => {
                if !path.insert(id) {
                    debug!(sequence = %id, "sequence contains itself, treating as unknown");
                    return None;
                }
                let total = graph.members(id).iter().fold(0u64, |total, member| {
                    let own = match member.duration {
                        Some(duration) => self.member_estimate(duration, sequence),
                        None => self
                            .estimate_content(graph, member.content_id, path)
                            .unwrap_or(sequence.default_duration),
                    };
                    total
                        .saturating_add(own)
                        .saturating_add(self.config.transition_gap_ms)
                });
                path.remove(&id);
                Some(total)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use montage_model::{
        FormatId, FormatSource, MediaContent, MemberId, StoredFileId,
        StoredFile, StructuredContent,
    };

    fn content(body: ContentBody) -> Content {
        let now = Utc::now();
        Content {
            id: ContentId::new(),
            name: "c".into(),
            bg_color: None,
            body,
            created_at: now,
            updated_at: now,
        }
    }

    fn media(durations: &[Option<i64>]) -> Content {
        let id = ContentId::new();
        let formats = durations
            .iter()
            .map(|duration| Format {
                id: FormatId::new(),
                content_id: id,
                source: FormatSource::File {
                    file: StoredFile {
                        id: StoredFileId::new(),
                        bucket: "cdn".into(),
                        path: "x".into(),
                    },
                },
                width: None,
                height: None,
                duration: duration.map(DeclaredDuration),
                info: serde_json::Value::Null,
                thumbnails: Vec::new(),
                created_at: Utc::now(),
            })
            .collect();
        Content {
            id,
            ..content(ContentBody::Media(MediaContent { fidx: 0, formats }))
        }
    }

    fn sequence(default_duration: u64) -> Content {
        content(ContentBody::Sequence(SequenceContent { default_duration }))
    }

    fn structured() -> Content {
        content(ContentBody::Structured(StructuredContent::default()))
    }

    fn member(
        sequence: &Content,
        payload: &Content,
        position: u32,
        duration: Option<i64>,
    ) -> SequenceMember {
        SequenceMember {
            id: MemberId::new(),
            sequence_id: sequence.id,
            content_id: payload.id,
            position,
            duration: duration.map(DeclaredDuration),
        }
    }

    fn graph(contents: &[&Content], members: Vec<SequenceMember>) -> ContentGraph {
        ContentGraph::from_snapshot(&StoreSnapshot {
            contents: contents.iter().map(|c| (*c).clone()).collect(),
            members,
        })
    }

    #[test]
    fn media_takes_the_longest_format() {
        let clip = media(&[Some(5000), Some(-1)]);
        let estimator = DurationEstimator::default();
        assert_eq!(estimator.estimate_in(&graph(&[&clip], vec![]), clip.id), Some(10_000));
    }

    #[test]
    fn media_without_duration_assumes_the_fallback() {
        let clip = media(&[None, Some(2500)]);
        let estimator = DurationEstimator::default();
        assert_eq!(estimator.estimate_in(&graph(&[&clip], vec![]), clip.id), Some(10_000));

        let empty = media(&[]);
        assert_eq!(estimator.estimate_in(&graph(&[&empty], vec![]), empty.id), None);
    }

    #[test]
    fn structured_content_has_no_duration() {
        let generated = structured();
        let estimator = DurationEstimator::default();
        assert_eq!(estimator.estimate_in(&graph(&[&generated], vec![]), generated.id), None);
    }

    #[test]
    fn sequence_sums_members_plus_transition_gaps() {
        let seq = sequence(10_000);
        let clip = media(&[Some(1)]);
        let generated = structured();
        let members = vec![
            member(&seq, &clip, 0, Some(3000)),
            member(&seq, &generated, 1, None),
        ];
        let estimator = DurationEstimator::default();
        let graph = graph(&[&seq, &clip, &generated], members);
        assert_eq!(estimator.estimate_in(&graph, seq.id), Some(3000 + 10_000 + 2 * 1000));
        // No hidden state between calls.
        assert_eq!(estimator.estimate_in(&graph, seq.id), Some(15_000));
    }

    #[test]
    fn member_step_sentinels_scale_by_the_sequence_default() {
        let seq = sequence(4000);
        let clip = media(&[Some(1)]);
        let estimator = DurationEstimator::default();
        let graph = graph(
            &[&seq, &clip],
            vec![member(&seq, &clip, 0, Some(-1)), member(&seq, &clip, 1, Some(-3))],
        );
        let expected = 4000 + (3 * 4000 + 2 * 250) + 2 * 1000;
        assert_eq!(estimator.estimate_in(&graph, seq.id), Some(expected));
    }

    #[test]
    fn nested_sequences_recurse() {
        let outer = sequence(10_000);
        let inner = sequence(10_000);
        let clip = media(&[Some(2000)]);
        let graph = graph(
            &[&outer, &inner, &clip],
            vec![member(&inner, &clip, 0, None), member(&outer, &inner, 0, None)],
        );
        let estimator = DurationEstimator::default();
        assert_eq!(estimator.estimate_in(&graph, inner.id), Some(3000));
        assert_eq!(estimator.estimate_in(&graph, outer.id), Some(4000));
    }

    #[test]
    fn self_referencing_sequences_fall_back_to_the_default() {
        let seq = sequence(5000);
        let graph = graph(&[&seq], vec![member(&seq, &seq, 0, None)]);
        let estimator = DurationEstimator::default();
        assert_eq!(estimator.estimate_in(&graph, seq.id), Some(5000 + 1000));
    }

    #[test]
    fn empty_sequences_estimate_to_zero() {
        let seq = sequence(5000);
        let estimator = DurationEstimator::default();
        assert_eq!(estimator.estimate_in(&graph(&[&seq], vec![]), seq.id), Some(0));
    }
}
