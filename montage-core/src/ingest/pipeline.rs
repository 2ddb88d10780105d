use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use montage_model::{
    ContentId, FormatId, FormatSource, NewFormat, NewThumbnail, StoredFile,
    TokenId, TokenUpdate, UserId,
};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::MEDIA_FORMAT_UPLOAD;
use crate::{
    config::{MediaConfig, ThumbnailSize},
    error::{ContentError, Result},
    media::{MediaInspector, ThumbnailGenerator, thumbnail_filename},
    object_store::{ObjectStore, RemoteError},
    progress::ProgressTokens,
    store::ContentStore,
};

pub(crate) const TOTAL_STEPS: u32 = 6;

pub const STEP_PARSING: &str = "Parsing Media Information";
pub const STEP_UPLOADING_FILE: &str = "Uploading Media File";
pub const STEP_GENERATING_THUMBNAILS: &str = "Generating Thumbnails";
pub const STEP_UPLOADING_THUMBNAILS: &str = "Uploading Thumbnails";
pub const STEP_REGISTERING_FORMAT: &str = "Registering Media Format";
pub const STEP_REGISTERING_THUMBNAILS: &str = "Registering Media Format Thumbnails";
pub const STEP_FINISHING: &str = "Finishing";

/// Deferred half of an upload, created once every synchronous check passed.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub token_id: TokenId,
    pub content_id: ContentId,
    pub owner: Option<UserId>,
    /// Local bytes of the upload. Must stay in place until the token is
    /// terminal.
    pub source: PathBuf,
    pub storage_filename: String,
}

impl IngestJob {
    fn object_path(&self, filename: &str) -> String {
        format!("{}/{}", self.content_id, filename)
    }
}

/// Why a job stopped. Recorded on the token as its error payload.
#[derive(Debug)]
enum StepFailure {
    Remote { summary: String, error: RemoteError },
    Local { summary: String, error: ContentError },
}

impl StepFailure {
    fn remote(action: &str, error: RemoteError) -> Self {
        StepFailure::Remote {
            summary: format!("Exception while {action}"),
            error,
        }
    }

    fn local(action: &str, error: ContentError) -> Self {
        StepFailure::Local {
            summary: format!("Exception while {action}"),
            error,
        }
    }

    fn payload(&self) -> Value {
        match self {
            StepFailure::Remote { summary, error } => json!({
                "summary": summary,
                "filestore": error.to_payload(),
            }),
            StepFailure::Local { summary, error } => json!({
                "summary": summary,
                "kind": error.kind(),
                "detail": error.to_string(),
            }),
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::Remote { summary, error } => write!(f, "{summary}: {error}"),
            StepFailure::Local { summary, error } => write!(f, "{summary}: {error}"),
        }
    }
}

/// Runs the steps of one upload strictly in order.
#[derive(Clone)]
pub(crate) struct IngestPipeline {
    pub(crate) store: Arc<dyn ContentStore>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) inspector: Arc<dyn MediaInspector>,
    pub(crate) thumbnailer: Arc<dyn ThumbnailGenerator>,
    pub(crate) tokens: Arc<dyn ProgressTokens>,
    pub(crate) config: Arc<MediaConfig>,
}

impl fmt::Debug for IngestPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngestPipeline")
            .field("upload_bucket", &self.config.upload_bucket)
            .field("thumbnail_sizes", &self.config.thumbnail_sizes)
            .finish()
    }
}

async fn blocking<T, F>(action: &str, work: F) -> std::result::Result<T, StepFailure>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(StepFailure::local(action, error)),
        Err(join) => Err(StepFailure::local(
            action,
            ContentError::Internal(format!("blocking task failed: {join}")),
        )),
    }
}

impl IngestPipeline {
    /// Runs the job to a terminal token state.
    pub(crate) async fn run(&self, job: IngestJob) {
        info!(
            content_id = %job.content_id,
            token_id = %job.token_id,
            filename = %job.storage_filename,
            "ingestion started"
        );
        match self.execute(&job).await {
            Ok(format_id) => info!(
                content_id = %job.content_id,
                token_id = %job.token_id,
                format_id = %format_id,
                "ingestion finished"
            ),
            Err(failure) => {
                warn!(
                    content_id = %job.content_id,
                    token_id = %job.token_id,
                    "ingestion failed: {failure}"
                );
                self.fail(&job, failure.payload()).await;
            }
        }
    }

    /// Fails a job that will never run.
    pub(crate) async fn abandon(&self, job: &IngestJob, reason: &str) {
        warn!(
            content_id = %job.content_id,
            token_id = %job.token_id,
            "ingestion abandoned: {reason}"
        );
        self.fail(job, json!({ "summary": reason })).await;
    }

    async fn fail(&self, job: &IngestJob, payload: Value) {
        if let Err(err) = self
            .tokens
            .update(MEDIA_FORMAT_UPLOAD, job.token_id, TokenUpdate::failed(payload))
            .await
        {
            warn!(token_id = %job.token_id, "could not mark token failed: {err}");
        }
    }

    async fn progress(&self, job: &IngestJob, done: u32, label: &str, update: Option<TokenUpdate>) {
        debug!(token_id = %job.token_id, step = done + 1, "{label}");
        let step = TokenUpdate::step(label, done, TOTAL_STEPS);
        let update = match update {
            Some(extra) => TokenUpdate {
                metadata: extra.metadata,
                ..step
            },
            None => step,
        };
        if let Err(err) = self
            .tokens
            .update(MEDIA_FORMAT_UPLOAD, job.token_id, update)
            .await
        {
            // Progress is observational; the work carries on.
            warn!(token_id = %job.token_id, "progress update failed: {err}");
        }
    }

    async fn execute(&self, job: &IngestJob) -> std::result::Result<FormatId, StepFailure> {
        let config = &self.config;

        self.progress(job, 0, STEP_PARSING, None).await;
        let info = {
            let inspector = Arc::clone(&self.inspector);
            let source = job.source.clone();
            let filename = job.storage_filename.clone();
            blocking("parsing media information", move || {
                inspector.inspect(&source, &filename)
            })
            .await?
        };

        self.progress(job, 1, STEP_UPLOADING_FILE, None).await;
        let primary = self
            .objects
            .upload(
                &config.upload_bucket,
                &job.object_path(&job.storage_filename),
                &job.source,
                job.owner,
            )
            .await
            .map_err(|err| StepFailure::remote("uploading media file to bucket", err))?;

        self.progress(job, 2, STEP_GENERATING_THUMBNAILS, None).await;
        let scratch = self
            .scratch_dir(&job.storage_filename)
            .await
            .map_err(|err| StepFailure::local("preparing thumbnail scratch space", err))?;
        let rendered = {
            let thumbnailer = Arc::clone(&self.thumbnailer);
            let source = job.source.clone();
            let filename = job.storage_filename.clone();
            let out_dir = scratch.path().to_path_buf();
            let sizes = config.thumbnail_sizes.clone();
            let background = config.background_rgba();
            blocking("generating thumbnails", move || {
                thumbnailer.render(&source, &filename, &out_dir, &sizes, background)
            })
            .await?
        };

        self.progress(job, 3, STEP_UPLOADING_THUMBNAILS, None).await;
        let mut uploaded: Vec<(ThumbnailSize, StoredFile)> = Vec::with_capacity(rendered.len());
        for thumbnail in &rendered {
            let name = thumbnail
                .file_name()
                .map(str::to_string)
                .unwrap_or_else(|| thumbnail_filename(&job.storage_filename, thumbnail.size));
            let file = self
                .objects
                .upload(
                    &config.upload_bucket,
                    &job.object_path(&name),
                    &thumbnail.path,
                    job.owner,
                )
                .await
                .map_err(|err| StepFailure::remote("uploading thumbnail to bucket", err))?;
            uploaded.push((thumbnail.size, file));
        }
        // Thumbnails are in the bucket; local copies can go.
        drop(scratch);

        self.progress(job, 4, STEP_REGISTERING_FORMAT, None).await;
        let format = self
            .store
            .create_format(
                job.content_id,
                NewFormat {
                    source: FormatSource::File { file: primary },
                    width: info.width,
                    height: info.height,
                    duration: info.duration,
                    info: info.info_blob(),
                },
            )
            .await
            .map_err(|err| StepFailure::local("registering media format", err))?;

        self.progress(
            job,
            5,
            STEP_REGISTERING_THUMBNAILS,
            Some(TokenUpdate::default().with_metadata("format_id", format.id.to_string().into())),
        )
        .await;
        for (size, file) in uploaded {
            self.store
                .upsert_thumbnail(
                    format.id,
                    NewThumbnail {
                        width: size.width,
                        height: size.height,
                        file,
                    },
                )
                .await
                .map_err(|err| StepFailure::local("registering media format thumbnails", err))?;
        }

        self.progress(job, 6, STEP_FINISHING, None).await;
        if let Err(err) = self.tokens.close(MEDIA_FORMAT_UPLOAD, job.token_id).await {
            warn!(token_id = %job.token_id, "could not close token: {err}");
        }
        Ok(format.id)
    }

    async fn scratch_dir(&self, storage_filename: &str) -> Result<tempfile::TempDir> {
        let root = self.config.scratch_root();
        tokio::fs::create_dir_all(&root).await?;
        let stem = Path::new(storage_filename)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("upload");
        let dir = tempfile::Builder::new()
            .prefix(&format!("{stem}-"))
            .tempdir_in(&root)?;
        Ok(dir)
    }
}
