//! End-to-end runs of submit -> queue -> worker -> record, on a paused clock.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use clipo_models::{Geometry, RecordStatus};
use clipo_queue::JobQueue;

use common::{FakeInspector, FakeThumbnailer, Harness};

#[tokio::test(start_paused = true)]
async fn test_two_minute_video_is_processed() {
    let h = Harness::start(1, FakeInspector::returning(120.0), FakeThumbnailer::new());

    let submission = h
        .service
        .submit("/srv/uploads/5e1f.mp4", "holiday.mp4")
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(
        h.store.statuses_for(&submission.record_key),
        vec![RecordStatus::Processing, RecordStatus::Done]
    );

    let record = h.record(&submission.record_key).await;
    assert_eq!(record.status, RecordStatus::Done);
    assert_eq!(record.duration_seconds, Some(120.0));
    assert_eq!(record.duration_display.as_deref(), Some("00:02:00"));
    assert_eq!(
        record.thumbnail_reference.as_deref(),
        Some("thumb_5e1f.jpg")
    );
    assert_eq!(record.attempt, 1);
    assert!(record.processed_at.is_some());
    assert!(record.error_message.is_none());
    assert_eq!(
        record.task_reference.as_deref(),
        Some(submission.job_id.as_str())
    );

    let extractions = h.thumbnailer.calls();
    assert_eq!(extractions.len(), 1);
    assert_eq!(extractions[0].timestamp, 12.0);
    assert_eq!(
        extractions[0].output,
        PathBuf::from("/srv/thumbnails/thumb_5e1f.jpg")
    );
    assert_eq!(extractions[0].geometry, Geometry::new(320, 240));

    let view = h
        .service
        .get_metadata(&submission.record_key)
        .await
        .unwrap();
    assert_eq!(view.duration.as_deref(), Some("00:02:00"));
    assert_eq!(
        view.thumbnail_url.as_deref(),
        Some("/thumbnails/thumb_5e1f.jpg")
    );

    assert_eq!(h.queue.dead_letter_len().await.unwrap(), 0);
    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_thumbnail_failure_is_retried_once() {
    let h = Harness::start(
        1,
        FakeInspector::returning(30.0),
        FakeThumbnailer::failing_times(1),
    );

    let submission = h
        .service
        .submit("/srv/uploads/a1.mov", "clip.mov")
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(
        h.store.statuses_for(&submission.record_key),
        vec![
            RecordStatus::Processing,
            RecordStatus::Failed,
            RecordStatus::Pending,
            RecordStatus::Processing,
            RecordStatus::Done,
        ]
    );

    let updates = h.store.updates_for(&submission.record_key);
    let failed = updates
        .iter()
        .find(|u| u.status == Some(RecordStatus::Failed))
        .unwrap();
    let done = updates
        .iter()
        .find(|u| u.status == Some(RecordStatus::Done))
        .unwrap();
    assert!(matches!(failed.processed_at, Some(Some(_))));
    assert!(matches!(done.processed_at, Some(Some(_))));
    assert_eq!(failed.attempts_remaining, Some(Some(2)));
    assert!(failed
        .error_message
        .clone()
        .flatten()
        .unwrap()
        .contains("Conversion failed!"));

    let record = h.record(&submission.record_key).await;
    assert_eq!(record.status, RecordStatus::Done);
    assert_eq!(record.attempt, 2);
    assert!(record.error_message.is_none());
    assert!(record.attempts_remaining.is_none());
    assert_eq!(record.duration_display.as_deref(), Some("00:00:30"));

    assert_eq!(h.inspector.calls().len(), 2);
    assert_eq!(h.thumbnailer.calls().len(), 2);
    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unreadable_file_is_dead_lettered_after_three_attempts() {
    let h = Harness::start(2, FakeInspector::failing(), FakeThumbnailer::new());

    let submission = h
        .service
        .submit("/srv/uploads/broken.mp4", "broken.mp4")
        .await
        .unwrap();
    h.settle().await;

    let calls = h.inspector.calls();
    assert_eq!(calls.len(), 3);
    for pair in calls.windows(2) {
        assert!(
            pair[1].started - pair[0].finished >= Duration::from_secs(60),
            "attempts {:?} apart",
            pair[1].started - pair[0].finished
        );
    }

    // The thumbnail step never runs when inspection fails.
    assert!(h.thumbnailer.calls().is_empty());

    let record = h.record(&submission.record_key).await;
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.attempt, 3);
    assert_eq!(record.attempts_remaining, Some(0));
    assert!(record.is_permanently_failed());
    assert!(record
        .error_message
        .as_deref()
        .unwrap()
        .contains("Invalid data found when processing input"));
    assert!(record.duration_seconds.is_none());
    assert!(record.thumbnail_reference.is_none());

    let dead = h.queue.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job.job_id, submission.job_id);
    assert_eq!(h.queue.len().await.unwrap(), 0);

    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_worker_survives_a_panicking_attempt() {
    let h = Harness::start(
        1,
        FakeInspector::returning(10.0).panicking_once(),
        FakeThumbnailer::new(),
    );

    let submission = h
        .service
        .submit("/srv/uploads/p.mp4", "p.mp4")
        .await
        .unwrap();
    h.settle().await;

    // The panicking attempt leaves the record processing; the retry picks it up from there.
    assert_eq!(
        h.store.statuses_for(&submission.record_key),
        vec![
            RecordStatus::Processing,
            RecordStatus::Processing,
            RecordStatus::Done,
        ]
    );
    let calls = h.inspector.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].started - calls[0].finished >= Duration::from_secs(60));

    let second = h
        .service
        .submit("/srv/uploads/q.mp4", "q.mp4")
        .await
        .unwrap();
    h.settle().await;
    assert_eq!(
        h.service.get_status(&second.record_key).await.unwrap(),
        RecordStatus::Done
    );

    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_every_record_ends_done_or_failed() {
    let h = Harness::start(
        3,
        FakeInspector::returning(75.5),
        FakeThumbnailer::failing_times(4),
    );

    let mut keys = Vec::new();
    for i in 0..5 {
        let submission = h
            .service
            .submit(format!("/srv/uploads/{i}.mp4"), format!("{i}.mp4"))
            .await
            .unwrap();
        keys.push(submission.record_key);
    }
    h.settle().await;

    for key in &keys {
        let record = h.record(key).await;
        assert!(
            record.status.is_terminal(),
            "record {} left {}",
            key,
            record.status
        );
        if record.status == RecordStatus::Failed {
            assert_eq!(record.attempts_remaining, Some(0));
        }
    }

    // Four thumbnail failures spread over five jobs: nothing exhausts three attempts
    // unless one job absorbed all of them.
    let done = h
        .service
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|v| v.status == RecordStatus::Done)
        .count();
    assert!(done >= 4);

    h.pool.stop().await.unwrap();
}
