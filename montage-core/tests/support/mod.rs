//! Shared fixtures for core integration tests.
#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use montage_core::{
    ContentService, InMemoryContentStore, InMemoryObjectStore,
    InMemoryProgressTokens, MediaConfig, ObjectStore, ProgressTokens,
    ThumbnailSize, MEDIA_FORMAT_UPLOAD,
};
use montage_model::{ProgressToken, TokenId};

/// Upper bound for a single ingestion in tests.
pub const INGEST_DEADLINE: Duration = Duration::from_secs(20);

/// Small thumbnail boxes, one worker, scratch space under `scratch`.
pub fn test_config(scratch: &Path) -> MediaConfig {
    MediaConfig {
        thumbnail_sizes: vec![ThumbnailSize::square(16), ThumbnailSize::new(32, 16)],
        scratch_dir: Some(scratch.to_path_buf()),
        ingest_workers: 1,
        ..MediaConfig::default()
    }
}

/// Writes a solid PNG of the given size.
pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 90]))
        .save(&path)
        .unwrap();
    path
}

/// Writes a minimal PDF with `pages` blank pages and a title.
pub fn write_pdf(dir: &Path, name: &str, pages: usize, title: &str) -> PathBuf {
    use lopdf::{Document, Object, dictionary};

    let path = dir.join(name);
    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            document
                .add_object(dictionary! { "Type" => "Page", "Parent" => pages_id })
                .into()
        })
        .collect();
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    let info_id = document.add_object(dictionary! {
        "Title" => Object::string_literal(title),
    });
    document.trailer.set("Root", catalog_id);
    document.trailer.set("Info", info_id);
    document.save(&path).unwrap();
    path
}

pub struct Harness {
    pub store: Arc<InMemoryContentStore>,
    pub objects: Arc<InMemoryObjectStore>,
    pub tokens: Arc<InMemoryProgressTokens>,
    pub service: ContentService,
    pub scratch: tempfile::TempDir,
    pub uploads: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let objects = Arc::new(InMemoryObjectStore::new());
        Self::with_objects(objects.clone(), objects)
    }

    /// `objects` is what the service talks to; `inspectable` is kept for
    /// assertions and may be the same store.
    pub fn with_objects(
        objects: Arc<dyn ObjectStore>,
        inspectable: Arc<InMemoryObjectStore>,
    ) -> Self {
        let scratch = tempfile::tempdir().unwrap();
        let uploads = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryContentStore::new());
        let tokens = Arc::new(InMemoryProgressTokens::new());
        let service = ContentService::builder(test_config(scratch.path()))
            .store(store.clone())
            .objects(objects)
            .tokens(tokens.clone())
            .build()
            .unwrap();
        Self {
            store,
            objects: inspectable,
            tokens,
            service,
            scratch,
            uploads,
        }
    }

    pub fn png(&self, name: &str, width: u32, height: u32) -> PathBuf {
        write_png(self.uploads.path(), name, width, height)
    }

    pub async fn wait_for_terminal(&self, id: TokenId) -> ProgressToken {
        wait_for_terminal(self.tokens.as_ref(), id).await
    }

    /// Files left behind in the scratch root.
    pub fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Polls until the upload token is `Done` or `Failed`.
pub async fn wait_for_terminal(tokens: &dyn ProgressTokens, id: TokenId) -> ProgressToken {
    tokio::time::timeout(INGEST_DEADLINE, async {
        loop {
            let token = tokens.get(MEDIA_FORMAT_UPLOAD, id).await.unwrap();
            if token.is_terminal() {
                return token;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("ingestion did not finish in time")
}
