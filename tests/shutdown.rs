//! 关闭顺序与期限

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use presence_sentinel::capture::SourceKind;
use presence_sentinel::events::{EventSink, SinkConfig};
use presence_sentinel::overlay::Annotator;
use presence_sentinel::worker::CameraSetup;
use presence_sentinel::{PresenceEvent, Sentinel};

use common::*;

#[test]
fn test_store_closed_after_last_append() {
    let script = script(&[&[1], &[1], &[], &[], &[], &[2]]);
    let store = Arc::new(MemoryStore::default());

    let sentinel = Sentinel::start(
        fast_options(),
        vec![
            scripted_camera(0, SourceKind::Finite, &script),
            scripted_camera(1, SourceKind::Finite, &script),
        ],
        Box::new(RecordingTransport::default()),
        store.clone(),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || store.len() >= 6));
    let report = sentinel.shutdown();
    assert!(report.is_clean());

    let calls = store.calls.lock();
    assert_eq!(calls.last(), Some(&"close"));
    assert_eq!(calls.iter().filter(|c| **c == "close").count(), 1);
    // 关闭前的所有写入都成功了
    assert_eq!(report.sink.stats.persist_failed, 0);
    assert_eq!(report.sink.stats.persisted as usize, store.len());
    assert_eq!(report.sink.stats.persist_dropped, 0);
}

#[test]
fn test_stop_interrupts_retry_pause() {
    let mut options = fast_options();
    options.worker.retry_delay = Duration::from_secs(30);
    let store = Arc::new(MemoryStore::default());

    let sentinel = Sentinel::start(
        options,
        vec![CameraSetup {
            camera_id: 0,
            source: Box::new(BrokenSource),
            detector: Box::new(FailingDetector),
        }],
        Box::new(RecordingTransport::default()),
        store.clone(),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();

    std::thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    let report = sentinel.shutdown();

    assert!(started.elapsed() < Duration::from_secs(5));
    let stats = report.workers[0].stats.as_ref().unwrap();
    assert!(stats.capture_failures >= 1);
    assert_eq!(stats.frames, 0);
    assert!(report.store_closed);
}

#[test]
fn test_stuck_worker_is_abandoned_after_deadline() {
    let mut options = fast_options();
    options.worker_stop_timeout = Duration::from_millis(200);
    let store = Arc::new(MemoryStore::default());
    let live = script(&[&[1]]);

    let sentinel = Sentinel::start(
        options,
        vec![
            CameraSetup {
                camera_id: 0,
                source: Box::new(StuckSource {
                    block_for: Duration::from_secs(10),
                }),
                detector: Box::new(FailingDetector),
            },
            scripted_camera(1, SourceKind::Live, &live),
        ],
        Box::new(RecordingTransport::default()),
        store.clone(),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || store.len() >= 1));
    assert_eq!(sentinel.running_workers(), 2);
    assert!(sentinel.sink_stats().published >= 1);
    let started = Instant::now();
    let report = sentinel.shutdown();

    // 卡住的线程被放弃, 其余步骤照常完成
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(!report.is_clean());
    let stuck = report.workers.iter().find(|w| w.camera_id == 0).unwrap();
    assert!(stuck.stats.is_none());
    let healthy = report.workers.iter().find(|w| w.camera_id == 1).unwrap();
    assert!(healthy.stats.is_some());
    assert!(report.sink.persister_exited);
    assert!(report.store_closed);
    assert_eq!(store.events_for(1).len(), 1);
}

#[test]
fn test_sink_drains_queued_events_on_shutdown() {
    let store = Arc::new(MemoryStore::default());
    let transport = RecordingTransport::default();
    let sent = transport.sent.clone();
    let config = SinkConfig {
        poll_interval: Duration::from_millis(20),
        drain_timeout: Duration::from_secs(2),
        ..SinkConfig::default()
    };
    let sink = EventSink::start(Box::new(transport), store.clone(), config).unwrap();

    let publisher = sink.publisher();
    for id in 0..50 {
        publisher.publish(&PresenceEvent::entered(0, id, chrono::Local::now(), 1));
    }
    let report = sink.shutdown();

    assert!(report.notifier_exited && report.persister_exited);
    assert_eq!(report.stats.published, 50);
    assert_eq!(report.stats.persisted, 50);
    assert_eq!(store.len(), 50);
    assert_eq!(sent.lock().len(), 50);

    // 关闭后发布不会阻塞, 只计入丢弃
    publisher.publish(&PresenceEvent::entered(0, 99, chrono::Local::now(), 1));
    let stats = publisher.stats();
    assert_eq!(stats.persist_dropped, 1);
    assert_eq!(stats.notify_dropped, 1);
}
