//! Media ingestion: synchronous admission checks, then a deferred pipeline
//! reporting through a progress token.
//!
//! [`IngestService::begin_ingestion`] validates the request, reserves the
//! storage filename and opens the token before anything is queued, so every
//! caller error surfaces immediately. The remaining work runs on the worker
//! pool and is only observable through the token.

mod pipeline;
mod runtime;

use std::{fmt, path::PathBuf, sync::Arc};

use montage_model::{
    ContentId, ContentKind, OpenToken, ProgressToken, TokenId, TokenUpdate,
    UserId,
};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

pub use pipeline::{
    IngestJob, STEP_FINISHING, STEP_GENERATING_THUMBNAILS, STEP_PARSING,
    STEP_REGISTERING_FORMAT, STEP_REGISTERING_THUMBNAILS,
    STEP_UPLOADING_FILE, STEP_UPLOADING_THUMBNAILS,
};
use pipeline::{IngestPipeline, TOTAL_STEPS};
use runtime::IngestRuntime;

use crate::{
    access::{AccessProbe, Action},
    config::{MediaConfig, extension_of},
    error::{ContentError, Result},
    media::{MediaInspector, ThumbnailGenerator},
    object_store::ObjectStore,
    progress::ProgressTokens,
    store::ContentStore,
};

/// Token namespace of media uploads.
pub const MEDIA_FORMAT_UPLOAD: &str = "media-format-upload";

/// Label of a freshly opened upload token.
pub const REQUEST_CREATED: &str = "Request Created";

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub content_id: ContentId,
    /// Name the client gave the file. Only its extension is used.
    pub filename: String,
    /// Local copy of the uploaded bytes.
    pub source: PathBuf,
    pub owner: Option<UserId>,
}

/// Handed back as soon as an upload is accepted.
#[derive(Debug, Clone)]
pub struct IngestTicket {
    pub token: ProgressToken,
    pub storage_filename: String,
}

/// Collaborators the ingestion path needs.
#[derive(Clone)]
pub struct IngestPorts {
    pub store: Arc<dyn ContentStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub inspector: Arc<dyn MediaInspector>,
    pub thumbnailer: Arc<dyn ThumbnailGenerator>,
    pub tokens: Arc<dyn ProgressTokens>,
    pub access: Arc<dyn AccessProbe>,
}

impl fmt::Debug for IngestPorts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestPorts").finish_non_exhaustive()
    }
}

/// `"{content_name}_f{index}{extension}"`, with path separators in the
/// name replaced so the result stays a single path segment.
pub fn storage_filename(content_name: &str, index: u32, extension: &str) -> String {
    let name: String = content_name
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect();
    format!("{name}_f{index}{extension}")
}

#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn ContentStore>,
    tokens: Arc<dyn ProgressTokens>,
    access: Arc<dyn AccessProbe>,
    config: Arc<MediaConfig>,
    runtime: Arc<IngestRuntime>,
}

impl fmt::Debug for IngestService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestService")
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl IngestService {
    /// Starts the worker pool. Must be called inside a Tokio runtime.
    pub fn start(ports: IngestPorts, config: Arc<MediaConfig>) -> Result<Self> {
        let pipeline = IngestPipeline {
            store: Arc::clone(&ports.store),
            objects: ports.objects,
            inspector: ports.inspector,
            thumbnailer: ports.thumbnailer,
            tokens: Arc::clone(&ports.tokens),
            config: Arc::clone(&config),
        };
        let runtime = IngestRuntime::start(
            pipeline,
            config.ingest_workers,
            config.ingest_queue_size,
        )?;
        Ok(Self {
            store: ports.store,
            tokens: ports.tokens,
            access: ports.access,
            config,
            runtime: Arc::new(runtime),
        })
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    /// Accepts an upload and defers the heavy lifting.
    ///
    /// Fails synchronously with `NotFound`, `VariantMismatch`,
    /// `UnsupportedFileType` or whatever the access probe reports. No token
    /// exists when any of these is returned.
    pub async fn begin_ingestion(&self, request: UploadRequest) -> Result<IngestTicket> {
        let content = self.store.get(request.content_id, None).await?;
        if !content.kind().allows_actual_media() {
            return Err(ContentError::VariantMismatch {
                content: content.id,
                action: Action::UploadMedia.to_string(),
                expected: ContentKind::Media,
                actual: content.kind(),
            });
        }

        let extension = extension_of(&request.filename)
            .filter(|ext| self.config.is_allowed_extension(ext))
            .ok_or_else(|| ContentError::UnsupportedFileType {
                content: content.id,
                filename: request.filename.clone(),
                extension: extension_of(&request.filename).unwrap_or_default(),
            })?;

        self.access
            .probe(request.owner, &content, Action::UploadMedia)
            .await?;

        let index = self.store.burn_format_index(content.id).await?;
        let storage_filename = storage_filename(&content.name, index, &extension);
        debug!(content_id = %content.id, %storage_filename, "reserved storage filename");

        let mut metadata = Map::new();
        metadata.insert("content_id".into(), Value::String(content.id.to_string()));
        metadata.insert("filename".into(), Value::String(storage_filename.clone()));
        metadata.insert(
            "original_filename".into(),
            Value::String(request.filename.clone()),
        );
        let token = self
            .tokens
            .open(OpenToken {
                namespace: MEDIA_FORMAT_UPLOAD.into(),
                owner: request.owner,
                current: REQUEST_CREATED.into(),
                max: 1,
                ttl_secs: self.config.token_ttl_secs,
                metadata,
            })
            .await?;

        let job = IngestJob {
            token_id: token.id,
            content_id: content.id,
            owner: request.owner,
            source: request.source,
            storage_filename: storage_filename.clone(),
        };
        if let Err(err) = self.runtime.submit(job) {
            let payload = json!({
                "summary": "Exception while queueing the upload",
                "detail": err.to_string(),
            });
            self.tokens
                .update(MEDIA_FORMAT_UPLOAD, token.id, TokenUpdate::failed(payload))
                .await?;
            return Err(err);
        }

        info!(
            content_id = %content.id,
            token_id = %token.id,
            filename = %storage_filename,
            steps = TOTAL_STEPS,
            "upload accepted"
        );
        Ok(IngestTicket {
            token,
            storage_filename,
        })
    }

    pub async fn token(&self, id: TokenId) -> Result<ProgressToken> {
        self.tokens.get(MEDIA_FORMAT_UPLOAD, id).await
    }

    /// Stops the workers. Queued uploads that never started are failed.
    pub async fn shutdown(&self) {
        self.runtime.shutdown().await;
    }
}
