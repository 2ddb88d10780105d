use montage_core::{ContentService, ContentStore, DurationEstimator, MediaConfig};
use montage_model::{
    DeclaredDuration, FormatSource, NewContent, NewFormat, StoredFile,
    StoredFileId,
};
use serde_json::{Value, json};

fn stored(path: &str) -> NewFormat {
    NewFormat {
        source: FormatSource::File {
            file: StoredFile {
                id: StoredFileId::new(),
                bucket: "incoming".into(),
                path: path.into(),
            },
        },
        width: None,
        height: None,
        duration: None,
        info: Value::Null,
    }
}

fn service() -> ContentService {
    ContentService::builder(MediaConfig::default()).build().unwrap()
}

#[tokio::test]
async fn media_takes_the_larger_of_literal_and_step_durations() {
    let svc = service();
    let clip = svc.create_content(NewContent::media("clip")).await.unwrap();
    for (path, duration) in [("a.mp4", 5000), ("b.png", -1)] {
        svc.store()
            .create_format(
                clip.id,
                NewFormat {
                    duration: Some(DeclaredDuration(duration)),
                    ..stored(path)
                },
            )
            .await
            .unwrap();
    }

    assert_eq!(svc.estimate_duration(clip.id).await.unwrap(), Some(10_000));
    svc.shutdown().await;
}

#[tokio::test]
async fn sequence_falls_back_to_its_default_for_structured_members() {
    let svc = service();
    let seq = svc
        .create_content(NewContent::sequence("reel", 10_000))
        .await
        .unwrap();
    let clip = svc.create_content(NewContent::media("clip")).await.unwrap();
    svc.store().create_format(clip.id, stored("c.mp4")).await.unwrap();
    let widget = svc
        .create_content(NewContent::structured("clock", "widgets/clock", json!({})))
        .await
        .unwrap();

    svc.add_member(seq.id, clip.id, None, Some(DeclaredDuration(3000)))
        .await
        .unwrap();
    // Structured content has no estimate, so the member needs a duration
    // or the insert is refused.
    let err = svc.add_member(seq.id, widget.id, None, None).await.unwrap_err();
    assert_eq!(err.kind(), montage_core::ErrorKind::MissingDuration);

    // Rows written without a duration fall back to the sequence default.
    let mut snapshot = montage_model::StoreSnapshot::default();
    snapshot.contents = svc.store().list().await.unwrap();
    snapshot.members = svc.members(seq.id).await.unwrap();
    snapshot.members.push(montage_model::SequenceMember {
        id: montage_model::MemberId::new(),
        sequence_id: seq.id,
        content_id: widget.id,
        position: 1,
        duration: None,
    });
    let graph = montage_core::ContentGraph::from_snapshot(&snapshot);
    let estimator = DurationEstimator::new(svc.config().duration);
    let expected = 3000 + 10_000 + 2 * 1000;
    assert_eq!(estimator.estimate_in(&graph, seq.id), Some(expected));
    assert_eq!(estimator.estimate_in(&graph, seq.id), Some(expected));
    svc.shutdown().await;
}

#[tokio::test]
async fn members_inherit_estimates_when_added_without_duration() {
    let svc = service();
    let seq = svc
        .create_content(NewContent::sequence("reel", 4000))
        .await
        .unwrap();
    let clip = svc.create_content(NewContent::media("clip")).await.unwrap();
    svc.store()
        .create_format(
            clip.id,
            NewFormat {
                duration: Some(DeclaredDuration(7000)),
                ..stored("d.mp4")
            },
        )
        .await
        .unwrap();

    let member = svc.add_member(seq.id, clip.id, None, None).await.unwrap();
    assert_eq!(member.duration, Some(DeclaredDuration(7000)));
    assert_eq!(svc.estimate_duration(seq.id).await.unwrap(), Some(8000));

    svc.set_default_duration(seq.id, 2000).await.unwrap();
    svc.add_member(seq.id, clip.id, None, Some(DeclaredDuration(-2)))
        .await
        .unwrap();
    // 7000 + (2 * 2000 + 250) + two gaps
    assert_eq!(svc.estimate_duration(seq.id).await.unwrap(), Some(13_250));
    svc.shutdown().await;
}

#[tokio::test]
async fn estimates_of_unknown_contents_are_not_found() {
    let svc = service();
    let err = svc
        .estimate_duration(montage_model::ContentId::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), montage_core::ErrorKind::NotFound);
    svc.shutdown().await;
}
