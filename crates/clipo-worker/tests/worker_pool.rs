//! Worker pool concurrency, lease renewal and shutdown.

mod common;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clipo_models::RecordStatus;
use clipo_queue::{JobQueue, MemoryJobQueue};
use clipo_worker::WorkerError;

use common::{
    read_record, settle_queue, spawn_pool, worker_config, FakeInspector, FakeThumbnailer, Harness,
};

#[tokio::test(start_paused = true)]
async fn test_each_job_runs_once_across_workers() {
    let h = Harness::start(
        4,
        FakeInspector::returning(42.0).with_work(Duration::from_secs(10)),
        FakeThumbnailer::new(),
    );
    assert_eq!(h.pool.size(), 4);

    for i in 0..8 {
        h.service
            .submit(format!("/srv/uploads/{i}.mp4"), format!("{i}.mp4"))
            .await
            .unwrap();
    }
    h.settle().await;

    let calls = h.inspector.calls();
    let mut per_file: HashMap<PathBuf, usize> = HashMap::new();
    for call in &calls {
        *per_file.entry(call.path.clone()).or_default() += 1;
    }
    assert_eq!(per_file.len(), 8);
    assert!(per_file.values().all(|&n| n == 1));

    // Never more inspections in flight than workers.
    let max_overlap = calls
        .iter()
        .map(|c| {
            calls
                .iter()
                .filter(|o| o.started <= c.started && c.started < o.finished)
                .count()
        })
        .max()
        .unwrap();
    assert_eq!(max_overlap, 4);

    for record in h.service.list_all().await.unwrap() {
        assert_eq!(record.status, RecordStatus::Done);
    }
    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_keeps_long_job_leased() {
    let config = clipo_worker::WorkerConfig {
        job_heartbeat_interval: Duration::from_secs(5),
        ..worker_config(2)
    };
    let h = Harness::start_with(
        config,
        MemoryJobQueue::new(3, Duration::from_secs(20)),
        FakeInspector::returning(600.0).with_work(Duration::from_secs(50)),
        FakeThumbnailer::new(),
    );

    let submission = h
        .service
        .submit("/srv/uploads/long.mkv", "long.mkv")
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.inspector.calls().len(), 1);
    let record = h.record(&submission.record_key).await;
    assert_eq!(record.status, RecordStatus::Done);
    assert_eq!(record.attempt, 1);
    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_the_running_job_finish() {
    let h = Harness::start(
        1,
        FakeInspector::returning(5.0).with_work(Duration::from_secs(10)),
        FakeThumbnailer::new(),
    );

    let submission = h
        .service
        .submit("/srv/uploads/s.mp4", "s.mp4")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.pool.stop().await.unwrap();

    assert_eq!(
        h.service.get_status(&submission.record_key).await.unwrap(),
        RecordStatus::Done
    );
    assert!(h.queue.is_empty().await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_stop_gives_up_after_shutdown_timeout() {
    let h = Harness::start(
        1,
        FakeInspector::returning(5.0).with_work(Duration::from_secs(300)),
        FakeThumbnailer::new(),
    );

    h.service
        .submit("/srv/uploads/stuck.mp4", "stuck.mp4")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let err = h.pool.stop().await.unwrap_err();
    assert!(matches!(err, WorkerError::ShutdownTimeout(30)));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_between_steps_gives_job_back() {
    let config = clipo_worker::WorkerConfig {
        cancel_between_steps: true,
        ..worker_config(1)
    };
    let h = Harness::start_with(
        config,
        MemoryJobQueue::new(3, Duration::from_secs(600)),
        FakeInspector::returning(5.0).with_work(Duration::from_secs(10)),
        FakeThumbnailer::new(),
    );

    let submission = h
        .service
        .submit("/srv/uploads/c.mp4", "c.mp4")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.pool.shutdown();
    h.pool.join().await.unwrap();

    assert!(h.thumbnailer.calls().is_empty());
    assert_eq!(h.queue.in_flight(), 0);
    assert_eq!(h.queue.len().await.unwrap(), 1);
    assert_eq!(h.queue.dead_letter_len().await.unwrap(), 0);
    assert_eq!(
        h.service.get_status(&submission.record_key).await.unwrap(),
        RecordStatus::Processing
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_on_last_attempt_keeps_job() {
    let config = clipo_worker::WorkerConfig {
        cancel_between_steps: true,
        ..worker_config(1)
    };
    let h = Harness::start_with(
        config.clone(),
        MemoryJobQueue::new(1, Duration::from_secs(600)),
        FakeInspector::returning(5.0).with_work(Duration::from_secs(10)),
        FakeThumbnailer::new(),
    );

    let submission = h
        .service
        .submit("/srv/uploads/d.mp4", "d.mp4")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    h.pool.shutdown();
    h.pool.join().await.unwrap();

    assert!(h.thumbnailer.calls().is_empty());
    assert_eq!(h.queue.dead_letter_len().await.unwrap(), 0);
    assert_eq!(h.queue.len().await.unwrap(), 1);

    let pool = spawn_pool(&config, &h.store, &h.queue, &h.inspector, &h.thumbnailer);
    settle_queue(&h.queue).await;

    let record = read_record(&h.store, &submission.record_key).await;
    assert_eq!(record.status, RecordStatus::Done);
    assert_eq!(record.attempt, 1);
    assert_eq!(h.inspector.calls().len(), 2);
    assert_eq!(h.queue.dead_letter_len().await.unwrap(), 0);
    pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_dead_letters_with_failed_record() {
    let h = Harness::start(1, FakeInspector::returning(30.0), FakeThumbnailer::new());
    h.store.reject_writes_of(RecordStatus::Done);

    let submission = h
        .service
        .submit("/srv/uploads/e.mp4", "e.mp4")
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.thumbnailer.calls().len(), 3);
    assert_eq!(h.queue.dead_letter_len().await.unwrap(), 1);
    assert_eq!(
        h.store.statuses_for(&submission.record_key),
        vec![
            RecordStatus::Processing,
            RecordStatus::Processing,
            RecordStatus::Processing,
            RecordStatus::Failed
        ]
    );

    let record = h.record(&submission.record_key).await;
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.attempts_remaining, Some(0));
    assert!(record.error_message.unwrap().contains("disk full"));
    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_panic_on_last_attempt_fails_record() {
    let h = Harness::start_with(
        worker_config(1),
        MemoryJobQueue::new(1, Duration::from_secs(600)),
        FakeInspector::returning(30.0).panicking_once(),
        FakeThumbnailer::new(),
    );

    let submission = h
        .service
        .submit("/srv/uploads/f.mp4", "f.mp4")
        .await
        .unwrap();
    h.settle().await;

    assert_eq!(h.queue.dead_letter_len().await.unwrap(), 1);
    let record = h.record(&submission.record_key).await;
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(record.error_message.as_deref(), Some("pipeline panicked"));
    assert_eq!(record.attempts_remaining, Some(0));
    assert!(h.thumbnailer.calls().is_empty());
    h.pool.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_idle_pool_stops_promptly() {
    let h = Harness::start(3, FakeInspector::returning(1.0), FakeThumbnailer::new());
    tokio::time::sleep(Duration::from_secs(5)).await;
    h.pool.stop().await.unwrap();
    assert!(h.inspector.calls().is_empty());
}
