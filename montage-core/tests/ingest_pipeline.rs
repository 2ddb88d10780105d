mod support;

use std::{collections::HashSet, path::Path, sync::Arc};

use async_trait::async_trait;
use mockall::mock;
use montage_core::{
    ContentStore, ErrorKind, InMemoryObjectStore, ObjectStore, RemoteError,
    UploadRequest,
    ingest::{
        STEP_FINISHING, STEP_GENERATING_THUMBNAILS, STEP_PARSING,
        STEP_REGISTERING_FORMAT, STEP_REGISTERING_THUMBNAILS,
        STEP_UPLOADING_FILE, STEP_UPLOADING_THUMBNAILS,
    },
    object_store::RemoteResult,
};
use montage_model::{
    ContentBody, ContentId, MediaContent, NewContent, StoreSnapshot,
    StoredFile, StoredFileId, TokenState, UserId,
};
use support::Harness;

mock! {
    pub Objects {}

    #[async_trait]
    impl ObjectStore for Objects {
        async fn upload(
            &self,
            bucket: &str,
            path: &str,
            source: &Path,
            owner: Option<UserId>,
        ) -> RemoteResult<StoredFile>;

        async fn relocate(
            &self,
            file: &StoredFile,
            to_bucket: &str,
        ) -> RemoteResult<StoredFile>;
    }
}

fn upload(content_id: ContentId, filename: &str, source: &Path) -> UploadRequest {
    UploadRequest {
        content_id,
        filename: filename.into(),
        source: source.to_path_buf(),
        owner: None,
    }
}

#[tokio::test]
async fn png_upload_runs_every_step_in_order() {
    let h = Harness::new();
    let clip = h.service.create_content(NewContent::media("poster")).await.unwrap();
    let source = h.png("poster.png", 40, 20);
    let mut events = h.tokens.subscribe();

    let ticket = h
        .service
        .begin_ingestion(upload(clip.id, "Poster.PNG", &source))
        .await
        .unwrap();
    assert_eq!(ticket.storage_filename, "poster_f0.png");
    assert_eq!(ticket.token.state, TokenState::Created);
    assert_eq!(ticket.token.max, 1);

    let token = h.wait_for_terminal(ticket.token.id).await;
    assert_eq!(token.state, TokenState::Done, "error: {:?}", token.error);
    assert_eq!((token.done, token.max), (6, 6));

    let mut labels = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.id == ticket.token.id && !labels.contains(&event.current) {
            labels.push(event.current);
        }
    }
    assert_eq!(
        labels,
        vec![
            "Request Created",
            STEP_PARSING,
            STEP_UPLOADING_FILE,
            STEP_GENERATING_THUMBNAILS,
            STEP_UPLOADING_THUMBNAILS,
            STEP_REGISTERING_FORMAT,
            STEP_REGISTERING_THUMBNAILS,
            STEP_FINISHING,
        ]
    );

    let stored = h.service.content(clip.id).await.unwrap();
    let media = stored.as_media().unwrap();
    assert_eq!(media.formats.len(), 1);
    let format = &media.formats[0];
    assert_eq!((format.width, format.height), (Some(40), Some(20)));
    assert_eq!(
        token.metadata.get("format_id").and_then(|v| v.as_str()),
        Some(format.id.to_string().as_str())
    );
    let file = format.source.stored_file().unwrap();
    assert_eq!(file.bucket, "incoming");
    assert_eq!(file.path, format!("{}/poster_f0.png", clip.id));

    let mut sizes: Vec<(u32, u32)> =
        format.thumbnails.iter().map(|t| (t.width, t.height)).collect();
    sizes.sort();
    assert_eq!(sizes, vec![(16, 16), (32, 16)]);
    assert!(format.thumbnail(32, 16).unwrap().file.path.ends_with("poster_f0.png.thumb_32x16.png"));

    assert_eq!(h.objects.files_in("incoming").len(), 3);
    assert_eq!(h.scratch_entries(), 0);
    h.service.shutdown().await;
}

#[tokio::test]
async fn thumbnail_upload_failure_leaves_no_rows() {
    let h = Harness::new();
    let clip = h.service.create_content(NewContent::media("banner")).await.unwrap();
    let source = h.png("banner.png", 64, 64);
    h.objects
        .fail_uploads_matching(".thumb_", RemoteError::new(503, r#"{"error":"busy"}"#));

    let ticket = h
        .service
        .begin_ingestion(upload(clip.id, "banner.png", &source))
        .await
        .unwrap();
    let token = h.wait_for_terminal(ticket.token.id).await;

    assert_eq!(token.state, TokenState::Failed);
    assert_eq!(token.current, STEP_UPLOADING_THUMBNAILS);
    let error = token.error.unwrap();
    assert_eq!(error["summary"], "Exception while uploading thumbnail to bucket");
    assert_eq!(error["filestore"]["code"], 503);
    assert_eq!(error["filestore"]["content"]["error"], "busy");

    let stored = h.service.content(clip.id).await.unwrap();
    assert!(stored.as_media().unwrap().formats.is_empty());
    assert_eq!(h.scratch_entries(), 0);
    h.service.shutdown().await;
}

#[tokio::test]
async fn primary_upload_failure_stops_before_thumbnails() {
    let mut objects = MockObjects::new();
    objects
        .expect_upload()
        .times(1)
        .withf(|bucket, path, _, _| bucket.to_string() == "incoming" && path.ends_with("/loop_f0.png"))
        .returning(|_, _, _, _| Err(RemoteError::new(507, "quota exceeded")));
    objects.expect_relocate().never();

    let h = Harness::with_objects(Arc::new(objects), Arc::new(InMemoryObjectStore::new()));
    let clip = h.service.create_content(NewContent::media("loop")).await.unwrap();
    let source = h.png("loop.png", 10, 10);

    let ticket = h
        .service
        .begin_ingestion(upload(clip.id, "loop.png", &source))
        .await
        .unwrap();
    let token = h.wait_for_terminal(ticket.token.id).await;

    assert_eq!(token.state, TokenState::Failed);
    assert_eq!(token.current, STEP_UPLOADING_FILE);
    assert_eq!(token.done, 1);
    let error = token.error.unwrap();
    assert_eq!(error["filestore"]["code"], 507);
    assert_eq!(error["filestore"]["content"], "quota exceeded");
    assert!(h.service.content(clip.id).await.unwrap().as_media().unwrap().formats.is_empty());
    h.service.shutdown().await;
}

#[tokio::test]
async fn a_single_failing_thumbnail_aborts_the_rest() {
    let mut objects = MockObjects::new();
    objects
        .expect_upload()
        .withf(|_, path, _, _| !path.contains(".thumb_"))
        .times(1)
        .returning(|bucket, path, _, _| {
            Ok(StoredFile {
                id: StoredFileId::new(),
                bucket: bucket.to_string(),
                path: path.to_string(),
            })
        });
    objects
        .expect_upload()
        .withf(|_, path, _, _| path.contains(".thumb_"))
        .times(1)
        .returning(|_, _, _, _| Err(RemoteError::new(500, "disk full")));

    let h = Harness::with_objects(Arc::new(objects), Arc::new(InMemoryObjectStore::new()));
    let clip = h.service.create_content(NewContent::media("wide")).await.unwrap();
    let source = h.png("wide.png", 80, 40);

    let ticket = h
        .service
        .begin_ingestion(upload(clip.id, "wide.png", &source))
        .await
        .unwrap();
    let token = h.wait_for_terminal(ticket.token.id).await;

    assert_eq!(token.state, TokenState::Failed);
    assert_eq!(token.done, 3);
    assert!(h.service.content(clip.id).await.unwrap().as_media().unwrap().formats.is_empty());
    h.service.shutdown().await;
}

#[tokio::test]
async fn disallowed_extension_is_refused_before_any_token() {
    let h = Harness::new();
    let clip = h.service.create_content(NewContent::media("tool")).await.unwrap();
    let source = h.uploads.path().join("setup.exe");
    std::fs::write(&source, b"MZ").unwrap();

    let err = h
        .service
        .begin_ingestion(upload(clip.id, "setup.exe", &source))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedFileType);
    assert!(err.to_string().contains(&clip.id.to_string()));
    assert!(h.tokens.is_empty());
    assert_eq!(h.objects.upload_calls(), 0);
    h.service.shutdown().await;
}

#[tokio::test]
async fn unreadable_media_fails_while_parsing() {
    let h = Harness::new();
    let clip = h.service.create_content(NewContent::media("broken")).await.unwrap();
    let source = h.uploads.path().join("broken.png");
    std::fs::write(&source, b"definitely not a png").unwrap();

    let ticket = h
        .service
        .begin_ingestion(upload(clip.id, "broken.png", &source))
        .await
        .unwrap();
    let token = h.wait_for_terminal(ticket.token.id).await;

    assert_eq!(token.state, TokenState::Failed);
    assert_eq!(token.current, STEP_PARSING);
    let error = token.error.unwrap();
    assert_eq!(error["summary"], "Exception while parsing media information");
    assert_eq!(error["kind"], "invalid_media");
    assert_eq!(h.objects.upload_calls(), 0);
    h.service.shutdown().await;
}

#[tokio::test]
async fn documents_are_registered_without_thumbnails() {
    let h = Harness::new();
    let clip = h.service.create_content(NewContent::media("menu")).await.unwrap();
    let source = support::write_pdf(h.uploads.path(), "menu.pdf", 2, "Lunch Menu");

    let ticket = h
        .service
        .begin_ingestion(upload(clip.id, "menu.pdf", &source))
        .await
        .unwrap();
    let token = h.wait_for_terminal(ticket.token.id).await;

    assert_eq!(token.state, TokenState::Done, "error: {:?}", token.error);
    let stored = h.service.content(clip.id).await.unwrap();
    let format = &stored.as_media().unwrap().formats[0];
    assert!(format.thumbnails.is_empty());
    assert_eq!(format.info["filename"], "menu_f0.pdf");
    assert_eq!(format.info["document"]["pages"], 2);
    assert_eq!(format.info["document"]["title"], "Lunch Menu");
    h.service.shutdown().await;
}

#[tokio::test]
async fn reservation_uses_the_current_index_and_burns_it() {
    let seeded = montage_model::Content {
        id: ContentId::new(),
        name: "promo".into(),
        bg_color: None,
        body: ContentBody::Media(MediaContent { fidx: 4, formats: Vec::new() }),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    let store = Arc::new(montage_core::InMemoryContentStore::from_snapshot(StoreSnapshot {
        contents: vec![seeded.clone()],
        members: Vec::new(),
    }));
    let scratch = tempfile::tempdir().unwrap();
    let service = montage_core::ContentService::builder(support::test_config(scratch.path()))
        .store(store.clone())
        .build()
        .unwrap();
    let source = support::write_png(scratch.path(), "promo.png", 8, 8);

    let ticket = service
        .begin_ingestion(upload(seeded.id, "promo.png", &source))
        .await
        .unwrap();
    assert_eq!(ticket.storage_filename, "promo_f4.png");
    let stored = store.get(seeded.id, None).await.unwrap();
    assert_eq!(stored.as_media().unwrap().fidx, 5);
    service.shutdown().await;
}

#[tokio::test]
async fn concurrent_reservations_never_collide() {
    let h = Harness::new();
    let clip = h.service.create_content(NewContent::media("burst")).await.unwrap();
    let source = h.png("burst.png", 8, 8);

    let attempts = (0..12).map(|_| {
        let service = h.service.clone();
        let request = upload(clip.id, "burst.png", &source);
        tokio::spawn(async move { service.begin_ingestion(request).await })
    });
    let tickets = futures::future::join_all(attempts).await;

    let names: HashSet<String> = tickets
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().storage_filename)
        .collect();
    assert_eq!(names.len(), 12);
    assert!(names.contains("burst_f0.png") && names.contains("burst_f11.png"));
    h.service.shutdown().await;
}
