//! Moving ingested files from the upload bucket to the publish bucket.

use std::{fmt, sync::Arc};

use montage_model::{Content, ContentBody, ContentId, Format, StoredFile, UserId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    access::{AccessProbe, Action},
    error::Result,
    object_store::ObjectStore,
    store::ContentStore,
};

/// A file that could not be published.
#[derive(Debug, Clone, Serialize)]
pub struct PublishFailure {
    pub file: StoredFile,
    pub error: String,
}

/// Outcome of one [`Publisher::publish`] call. Moves are independent, so a
/// report can hold successes and failures side by side.
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub content_id: ContentId,
    pub moved: Vec<StoredFile>,
    pub failed: Vec<PublishFailure>,
    pub already_published: usize,
}

impl PublishReport {
    fn new(content_id: ContentId) -> Self {
        Self {
            content_id,
            moved: Vec::new(),
            failed: Vec::new(),
            already_published: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct Publisher {
    store: Arc<dyn ContentStore>,
    objects: Arc<dyn ObjectStore>,
    access: Arc<dyn AccessProbe>,
    upload_bucket: String,
    publish_bucket: String,
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("upload_bucket", &self.upload_bucket)
            .field("publish_bucket", &self.publish_bucket)
            .finish()
    }
}

impl Publisher {
    pub fn new(
        store: Arc<dyn ContentStore>,
        objects: Arc<dyn ObjectStore>,
        access: Arc<dyn AccessProbe>,
        upload_bucket: impl Into<String>,
        publish_bucket: impl Into<String>,
    ) -> Self {
        Self {
            store,
            objects,
            access,
            upload_bucket: upload_bucket.into(),
            publish_bucket: publish_bucket.into(),
        }
    }

    pub fn publish_bucket(&self) -> &str {
        &self.publish_bucket
    }

    /// Moves every file of `content_id` still sitting in the upload bucket.
    /// A failed move is logged and recorded; the others still run.
    pub async fn publish(
        &self,
        content_id: ContentId,
        actor: Option<UserId>,
    ) -> Result<PublishReport> {
        let content = self.store.get(content_id, None).await?;
        self.access.probe(actor, &content, Action::Publish).await?;

        let mut report = PublishReport::new(content_id);
        let files: Vec<StoredFile> = match &content.body {
            ContentBody::Media(media) => media.stored_files().cloned().collect(),
            _ => Vec::new(),
        };

        for file in files {
            if file.in_bucket(&self.publish_bucket) {
                report.already_published += 1;
                continue;
            }
            if !file.in_bucket(&self.upload_bucket) {
                warn!(
                    content_id = %content_id,
                    file_id = %file.id,
                    bucket = %file.bucket,
                    "file is in neither the upload nor the publish bucket"
                );
                report.failed.push(PublishFailure {
                    error: format!("file is in unexpected bucket '{}'", file.bucket),
                    file,
                });
                continue;
            }
            match self.move_file(&file).await {
                Ok(moved) => report.moved.push(moved),
                Err(error) => {
                    warn!(
                        content_id = %content_id,
                        file_id = %file.id,
                        path = %file.path,
                        "failed to publish file: {error}"
                    );
                    report.failed.push(PublishFailure { file, error });
                }
            }
        }

        info!(
            content_id = %content_id,
            moved = report.moved.len(),
            failed = report.failed.len(),
            already_published = report.already_published,
            "publication finished"
        );
        Ok(report)
    }

    async fn move_file(&self, file: &StoredFile) -> std::result::Result<StoredFile, String> {
        let moved = self
            .objects
            .relocate(file, &self.publish_bucket)
            .await
            .map_err(|err| err.to_string())?;
        // The object already moved; a store failure here leaves the row
        // pointing at the old bucket.
        self.store
            .relocate_stored_file(file.id, &self.publish_bucket)
            .await
            .map_err(|err| format!("moved but not recorded: {err}"))?;
        debug!(file_id = %file.id, path = %file.path, "file published");
        Ok(moved)
    }

    /// True when every stored file of `format` is in the publish bucket.
    /// External formats have nothing to move.
    pub fn format_published(&self, format: &Format) -> bool {
        let primary = format
            .source
            .stored_file()
            .is_none_or(|file| file.in_bucket(&self.publish_bucket));
        primary
            && format
                .thumbnails
                .iter()
                .all(|thumb| thumb.file.in_bucket(&self.publish_bucket))
    }

    /// A single unmoved file makes the whole content unpublished. Contents
    /// without files are always published.
    pub fn is_published(&self, content: &Content) -> bool {
        content.as_media().is_none_or(|media| {
            media
                .formats
                .iter()
                .all(|format| self.format_published(format))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        access::AllowAll,
        object_store::{InMemoryObjectStore, RemoteError},
        store::InMemoryContentStore,
    };
    use montage_model::{FormatSource, NewContent, NewFormat, NewThumbnail};
    use std::io::Write;

    struct Fixture {
        store: Arc<InMemoryContentStore>,
        objects: Arc<InMemoryObjectStore>,
        publisher: Publisher,
        source: tempfile::NamedTempFile,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryContentStore::new());
        let objects = Arc::new(InMemoryObjectStore::new());
        let publisher = Publisher::new(
            store.clone(),
            objects.clone(),
            Arc::new(AllowAll),
            "incoming",
            "cdn",
        );
        let mut source = tempfile::NamedTempFile::new().unwrap();
        source.write_all(b"bytes").unwrap();
        Fixture {
            store,
            objects,
            publisher,
            source,
        }
    }

    async fn format_with_thumb(fx: &Fixture, content: ContentId, name: &str) -> Format {
        let primary = fx
            .objects
            .upload("incoming", &format!("{content}/{name}"), fx.source.path(), None)
            .await
            .unwrap();
        let thumb = fx
            .objects
            .upload(
                "incoming",
                &format!("{content}/{name}.thumb_128.png"),
                fx.source.path(),
                None,
            )
            .await
            .unwrap();
        let format = fx
            .store
            .create_format(
                content,
                NewFormat {
                    source: FormatSource::File { file: primary },
                    width: None,
                    height: None,
                    duration: None,
                    info: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();
        fx.store
            .upsert_thumbnail(
                format.id,
                NewThumbnail {
                    width: 128,
                    height: 128,
                    file: thumb,
                },
            )
            .await
            .unwrap();
        format
    }

    #[tokio::test]
    async fn content_is_published_only_when_every_file_moved() {
        let fx = fixture();
        let clip = fx.store.create(NewContent::media("clip")).await.unwrap();
        format_with_thumb(&fx, clip.id, "clip_f0.png").await;
        format_with_thumb(&fx, clip.id, "clip_f1.png").await;

        fx.objects.fail_relocations_matching(
            "clip_f1.png.thumb",
            RemoteError::new(503, "busy"),
        );
        let report = fx.publisher.publish(clip.id, None).await.unwrap();
        assert_eq!(report.moved.len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert!(!report.is_complete());

        let split = fx.store.get(clip.id, None).await.unwrap();
        assert!(!fx.publisher.is_published(&split));
        let media = split.as_media().unwrap();
        assert!(fx.publisher.format_published(&media.formats[0]));
        assert!(!fx.publisher.format_published(&media.formats[1]));

        fx.objects.clear_failures();
        let retry = fx.publisher.publish(clip.id, None).await.unwrap();
        assert_eq!(retry.moved.len(), 1);
        assert_eq!(retry.already_published, 3);
        let done = fx.store.get(clip.id, None).await.unwrap();
        assert!(fx.publisher.is_published(&done));
        assert_eq!(fx.objects.files_in("cdn").len(), 4);
    }

    #[tokio::test]
    async fn external_formats_and_other_kinds_count_as_published() {
        let fx = fixture();
        let clip = fx.store.create(NewContent::media("stream")).await.unwrap();
        fx.store
            .create_format(
                clip.id,
                NewFormat {
                    source: FormatSource::External {
                        uri: "https://example.org/live.m3u8".into(),
                    },
                    width: None,
                    height: None,
                    duration: None,
                    info: serde_json::Value::Null,
                },
            )
            .await
            .unwrap();
        let report = fx.publisher.publish(clip.id, None).await.unwrap();
        assert!(report.moved.is_empty() && report.is_complete());
        let clip = fx.store.get(clip.id, None).await.unwrap();
        assert!(fx.publisher.is_published(&clip));

        let seq = fx
            .store
            .create(NewContent::sequence("reel", 10_000))
            .await
            .unwrap();
        assert!(fx.publisher.is_published(&seq));
    }
}
