//! The operations the core offers to an API layer, bundled behind one
//! facade.

use std::{collections::BTreeMap, fmt, sync::Arc};

use montage_model::{
    Content, ContentBody, ContentId, ContentKind, DeclaredDuration, Format,
    FormatId,
    FormatSource, NewContent, ProgressToken, SequenceMember, StructuredContent,
    TokenId, UserId,
};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::{
    access::{AccessProbe, Action, AllowAll},
    config::MediaConfig,
    duration::{ContentGraph, DurationEstimator},
    error::{ContentError, Result},
    ingest::{IngestPorts, IngestService, IngestTicket, UploadRequest},
    media::{InspectorRegistry, MediaInspector, ThumbnailGenerator, ThumbnailerRegistry},
    object_store::{InMemoryObjectStore, ObjectStore},
    progress::{InMemoryProgressTokens, ProgressTokens},
    providers::ProviderRegistry,
    publish::{PublishReport, Publisher},
    sequence::SequenceEditor,
    store::{ContentStore, InMemoryContentStore, MemberMove},
};

/// Exported view of a format.
#[derive(Debug, Clone, Serialize)]
pub struct FormatInfo {
    pub format_id: FormatId,
    pub format_class: &'static str,
    /// `bucket/path` for stored files, the URI for external sources.
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    pub info: Value,
    /// `"{w}x{h}"` to stored path.
    pub thumbnails: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemberInfo {
    pub position: u32,
    pub content_id: ContentId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
}

/// Exported view of a content. Fields that do not apply to the kind are
/// left out.
#[derive(Debug, Clone, Serialize)]
pub struct ContentInfo {
    pub id: ContentId,
    pub name: String,
    pub kind: ContentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bg_color: Option<String>,
    /// Estimated playback time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub formats: Vec<FormatInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<MemberInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

pub struct ContentServiceBuilder {
    config: MediaConfig,
    store: Option<Arc<dyn ContentStore>>,
    objects: Option<Arc<dyn ObjectStore>>,
    inspector: Option<Arc<dyn MediaInspector>>,
    thumbnailer: Option<Arc<dyn ThumbnailGenerator>>,
    tokens: Option<Arc<dyn ProgressTokens>>,
    access: Option<Arc<dyn AccessProbe>>,
    providers: ProviderRegistry,
    accepted_kinds: Vec<ContentKind>,
}

impl fmt::Debug for ContentServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentServiceBuilder")
            .field("config", &self.config)
            .field("providers", &self.providers)
            .field("accepted_kinds", &self.accepted_kinds)
            .finish_non_exhaustive()
    }
}

impl Default for ContentServiceBuilder {
    fn default() -> Self {
        Self::new(MediaConfig::default())
    }
}

impl ContentServiceBuilder {
    /// Every collaborator not set explicitly falls back to its in-process
    /// adapter.
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config,
            store: None,
            objects: None,
            inspector: None,
            thumbnailer: None,
            tokens: None,
            access: None,
            providers: ProviderRegistry::new(),
            accepted_kinds: vec![
                ContentKind::Media,
                ContentKind::Structured,
                ContentKind::Sequence,
            ],
        }
    }

    pub fn store(mut self, store: Arc<dyn ContentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn objects(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn inspector(mut self, inspector: Arc<dyn MediaInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub fn thumbnailer(mut self, thumbnailer: Arc<dyn ThumbnailGenerator>) -> Self {
        self.thumbnailer = Some(thumbnailer);
        self
    }

    pub fn tokens(mut self, tokens: Arc<dyn ProgressTokens>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn access(mut self, access: Arc<dyn AccessProbe>) -> Self {
        self.access = Some(access);
        self
    }

    pub fn providers(mut self, providers: ProviderRegistry) -> Self {
        self.providers = providers;
        self
    }

    /// Restricts which kinds of content may be created.
    pub fn accepted_kinds(mut self, kinds: impl IntoIterator<Item = ContentKind>) -> Self {
        self.accepted_kinds = kinds.into_iter().collect();
        self.accepted_kinds.sort();
        self.accepted_kinds.dedup();
        self
    }

    /// Starts the ingestion workers, so this needs a Tokio runtime.
    pub fn build(self) -> Result<ContentService> {
        let config = Arc::new(self.config);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryContentStore::new()));
        let objects = self
            .objects
            .unwrap_or_else(|| Arc::new(InMemoryObjectStore::new()));
        let inspector = self
            .inspector
            .unwrap_or_else(|| Arc::new(InspectorRegistry::from_config(&config)));
        let thumbnailer = self
            .thumbnailer
            .unwrap_or_else(|| Arc::new(ThumbnailerRegistry::from_config(&config)));
        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(InMemoryProgressTokens::new()));
        let access = self.access.unwrap_or_else(|| Arc::new(AllowAll));

        let estimator = DurationEstimator::new(config.duration);
        let editor = SequenceEditor::new(Arc::clone(&store), estimator);
        let publisher = Publisher::new(
            Arc::clone(&store),
            Arc::clone(&objects),
            Arc::clone(&access),
            config.upload_bucket.clone(),
            config.publish_bucket.clone(),
        );
        let ingest = IngestService::start(
            IngestPorts {
                store: Arc::clone(&store),
                objects,
                inspector,
                thumbnailer,
                tokens,
                access: Arc::clone(&access),
            },
            Arc::clone(&config),
        )?;

        Ok(ContentService {
            config,
            store,
            access,
            estimator,
            editor,
            ingest,
            publisher,
            providers: self.providers,
            accepted_kinds: self.accepted_kinds,
        })
    }
}

#[derive(Clone)]
pub struct ContentService {
    config: Arc<MediaConfig>,
    store: Arc<dyn ContentStore>,
    access: Arc<dyn AccessProbe>,
    estimator: DurationEstimator,
    editor: SequenceEditor,
    ingest: IngestService,
    publisher: Publisher,
    providers: ProviderRegistry,
    accepted_kinds: Vec<ContentKind>,
}

impl fmt::Debug for ContentService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentService")
            .field("estimator", &self.estimator)
            .field("editor", &self.editor)
            .field("ingest", &self.ingest)
            .field("publisher", &self.publisher)
            .field("providers", &self.providers)
            .field("accepted_kinds", &self.accepted_kinds)
            .finish()
    }
}

impl ContentService {
    pub fn builder(config: MediaConfig) -> ContentServiceBuilder {
        ContentServiceBuilder::new(config)
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn ContentStore> {
        Arc::clone(&self.store)
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn accepted_kinds(&self) -> &[ContentKind] {
        &self.accepted_kinds
    }

    pub async fn create_content(&self, new: NewContent) -> Result<Content> {
        let kind = new.kind();
        if !self.accepted_kinds.contains(&kind) {
            return Err(ContentError::InvalidArgument(format!(
                "cannot create '{}': {kind} content is not accepted here",
                new.name
            )));
        }
        let content = self.store.create(new).await?;
        info!(content_id = %content.id, kind = %kind, name = %content.name, "created content");
        Ok(content)
    }

    /// Creates a sequence, using the configured default duration unless one
    /// is given.
    pub async fn create_sequence(
        &self,
        name: impl Into<String>,
        default_duration: Option<u64>,
    ) -> Result<Content> {
        let default_duration = default_duration
            .unwrap_or(self.config.duration.default_sequence_duration_ms);
        self.create_content(NewContent::sequence(name, default_duration))
            .await
    }

    pub async fn content(&self, id: ContentId) -> Result<Content> {
        self.store.get(id, None).await
    }

    /// Milliseconds, or `None` when the content has no intrinsic duration.
    pub async fn estimate_duration(&self, id: ContentId) -> Result<Option<u64>> {
        self.estimator.estimate(self.store.as_ref(), id).await
    }

    pub async fn members(&self, sequence_id: ContentId) -> Result<Vec<SequenceMember>> {
        self.editor.members(sequence_id).await
    }

    pub async fn add_member(
        &self,
        sequence_id: ContentId,
        content_id: ContentId,
        position: Option<u32>,
        duration: Option<DeclaredDuration>,
    ) -> Result<SequenceMember> {
        self.editor
            .add_member(sequence_id, content_id, position, duration)
            .await
    }

    pub async fn remove_member(
        &self,
        sequence_id: ContentId,
        position: u32,
    ) -> Result<SequenceMember> {
        self.editor.remove_member(sequence_id, position).await
    }

    pub async fn heal_positions(&self, sequence_id: ContentId) -> Result<Vec<MemberMove>> {
        self.editor.heal_positions(sequence_id).await
    }

    pub async fn set_default_duration(
        &self,
        sequence_id: ContentId,
        default_duration: u64,
    ) -> Result<Content> {
        self.editor
            .set_default_duration(sequence_id, default_duration)
            .await
    }

    /// Returns as soon as the upload is accepted; follow the ticket's token
    /// for the outcome.
    pub async fn begin_ingestion(&self, request: UploadRequest) -> Result<IngestTicket> {
        self.ingest.begin_ingestion(request).await
    }

    pub async fn upload_token(&self, id: TokenId) -> Result<ProgressToken> {
        self.ingest.token(id).await
    }

    pub async fn publish(
        &self,
        content_id: ContentId,
        actor: Option<UserId>,
    ) -> Result<PublishReport> {
        self.publisher.publish(content_id, actor).await
    }

    pub async fn is_published(&self, content_id: ContentId) -> Result<bool> {
        let content = self.store.get(content_id, None).await?;
        Ok(self.publisher.is_published(&content))
    }

    /// With `full`, publication state is included per format and overall.
    pub async fn content_info(&self, id: ContentId, full: bool) -> Result<ContentInfo> {
        let graph = ContentGraph::load(self.store.as_ref(), id).await?;
        let content = graph
            .content(id)
            .cloned()
            .ok_or_else(|| ContentError::content_not_found(id))?;

        let mut info = ContentInfo {
            id: content.id,
            name: content.name.clone(),
            kind: content.kind(),
            bg_color: content.bg_color.clone(),
            duration: self.estimator.estimate_in(&graph, id),
            formats: Vec::new(),
            members: Vec::new(),
            default_duration: None,
            path: None,
            args: None,
            published: full.then(|| self.publisher.is_published(&content)),
        };
        match &content.body {
            ContentBody::Media(media) => {
                info.formats = media
                    .formats
                    .iter()
                    .map(|format| self.export_format(format, full))
                    .collect();
            }
            ContentBody::Structured(StructuredContent { path, args }) => {
                info.path = path.clone();
                info.args = Some(args.clone());
            }
            ContentBody::Sequence(sequence) => {
                info.default_duration = Some(sequence.default_duration);
                info.members = graph
                    .members(id)
                    .iter()
                    .map(|member| MemberInfo {
                        position: member.position,
                        content_id: member.content_id,
                        duration: member.duration.map(|d| d.raw()),
                    })
                    .collect();
            }
        }
        Ok(info)
    }

    pub async fn format_info(
        &self,
        content_id: ContentId,
        format_id: FormatId,
        full: bool,
    ) -> Result<FormatInfo> {
        let content = self
            .store
            .get(content_id, Some(ContentKind::Media))
            .await?;
        let format = content
            .as_media()
            .and_then(|media| media.format(format_id))
            .ok_or_else(|| {
                ContentError::NotFound(format!("format {format_id} of content {content_id}"))
            })?;
        Ok(self.export_format(format, full))
    }

    fn export_format(&self, format: &Format, full: bool) -> FormatInfo {
        let location = match &format.source {
            FormatSource::File { file } => format!("{}/{}", file.bucket, file.path),
            FormatSource::External { uri } => uri.clone(),
        };
        FormatInfo {
            format_id: format.id,
            format_class: format.source.class_name(),
            location,
            width: format.width,
            height: format.height,
            duration: format.duration.map(|d| d.raw()),
            info: format.info.clone(),
            thumbnails: format
                .thumbnails
                .iter()
                .map(|thumb| (thumb.size_key(), thumb.file.path.clone()))
                .collect(),
            published: full.then(|| self.publisher.format_published(format)),
        }
    }

    /// Runs a provider and stores its output on a structured content.
    pub async fn generate_from_provider(
        &self,
        content_id: ContentId,
        provider: &str,
        args: Value,
        actor: Option<UserId>,
    ) -> Result<Content> {
        let content = self.store.get(content_id, None).await?;
        ContentError::ensure_kind(
            &content,
            ContentKind::Structured,
            Action::GenerateContent.as_str(),
        )?;
        self.access
            .probe(actor, &content, Action::GenerateContent)
            .await?;
        let provider = self.providers.get(provider)?;
        let payload = provider.generate(args).await?;
        let updated = self
            .store
            .update_structured(content_id, payload.into())
            .await?;
        info!(
            content_id = %content_id,
            provider = provider.name(),
            "generated structured content"
        );
        Ok(updated)
    }

    /// Stops the ingestion workers.
    pub async fn shutdown(&self) {
        self.ingest.shutdown().await;
    }
}
