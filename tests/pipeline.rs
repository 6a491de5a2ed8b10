//! 端到端: 采集线程 → 进出判定 → 通知 + 存储 → 最新帧仓库

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use presence_sentinel::capture::SourceKind;
use presence_sentinel::events::{EventStore, SqliteEventStore};
use presence_sentinel::overlay::Annotator;
use presence_sentinel::worker::CameraSetup;
use presence_sentinel::{EventType, Sentinel};

use common::*;

/// 人在第 0-4 帧出现, 第 5-9 帧消失 (每帧 1 秒)
fn walk_through() -> Script {
    script(&[&[1], &[1], &[1], &[1], &[1], &[], &[], &[], &[], &[]])
}

#[test]
fn test_person_enters_and_leaves() {
    let script = walk_through();
    let store = Arc::new(MemoryStore::default());
    let transport = RecordingTransport::default();
    let sent = transport.sent.clone();

    let sentinel = Sentinel::start(
        fast_options(),
        vec![scripted_camera(0, SourceKind::Finite, &script)],
        Box::new(transport),
        store.clone(),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || store.len() >= 2));
    let report = sentinel.shutdown();
    assert!(report.is_clean());

    let events = store.events_for(0);
    let entered = &events[0];
    assert_eq!(entered.event_type, EventType::Entered);
    assert_eq!(entered.person_track_id, 1);
    assert_eq!(entered.total_people_estimate, 1);
    assert_eq!(entered.duration, None);

    // 第 5 帧开始消失, 第 7 帧 (缓冲 2 秒) 确认离开; 停留 = 5 - 0
    let left = &events[1];
    assert_eq!(left.event_type, EventType::Left);
    assert_eq!(left.person_track_id, 1);
    assert_eq!(left.duration, Some(5.0));
    assert_eq!(left.total_people_estimate, 0);
    assert_eq!(
        (left.timestamp - entered.timestamp).num_milliseconds(),
        7 * FRAME_STEP_MS
    );

    let sent = sent.lock();
    assert!(sent[0].contains("Person 1 ENTERED"));
    assert!(sent[1].contains("Person 1 LEFT frame after 5.0s"));
}

#[test]
fn test_short_gap_does_not_emit_events() {
    // 中间消失 1 秒 (小于缓冲) 不算离开
    let script = script(&[&[4], &[4], &[], &[4], &[4], &[4]]);
    let store = Arc::new(MemoryStore::default());

    let sentinel = Sentinel::start(
        fast_options(),
        vec![scripted_camera(0, SourceKind::Live, &script)],
        Box::new(RecordingTransport::default()),
        store.clone(),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();

    // 实时源脚本结束后一直读帧失败, 不会再产生事件
    let frames = sentinel.frames();
    assert!(wait_until(Duration::from_secs(5), || {
        frames.latest(0).map_or(false, |f| f.seq == 5)
    }));
    std::thread::sleep(Duration::from_millis(100));
    let report = sentinel.shutdown();

    let events = store.events_for(0);
    assert_eq!(events.len(), 1, "{:?}", events);
    assert_eq!(events[0].event_type, EventType::Entered);
    assert_eq!(report.workers[0].stats.as_ref().unwrap().frames, 6);
    assert!(report.workers[0].stats.as_ref().unwrap().capture_failures > 0);
}

#[test]
fn test_notify_failure_does_not_block_persistence() {
    let script = walk_through();
    let store = Arc::new(MemoryStore::default());

    let sentinel = Sentinel::start(
        fast_options(),
        vec![scripted_camera(0, SourceKind::Finite, &script)],
        Box::new(RecordingTransport::failing()),
        store.clone(),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || store.len() >= 4));
    let report = sentinel.shutdown();

    assert!(report.sink.stats.notify_failed >= 4);
    assert_eq!(report.sink.stats.delivered, 0);
    assert_eq!(report.sink.stats.persist_failed, 0);
    assert_eq!(report.sink.stats.persisted, store.len() as u64);
}

#[test]
fn test_cameras_are_independent() {
    let busy = walk_through();
    let quiet = script(&[&[], &[]]);
    let store = Arc::new(MemoryStore::default());

    let sentinel = Sentinel::start(
        fast_options(),
        vec![
            scripted_camera(0, SourceKind::Finite, &busy),
            CameraSetup {
                camera_id: 1,
                source: Box::new(ScriptedSource::new(SourceKind::Finite, &quiet)),
                detector: Box::new(FailingDetector),
            },
            scripted_camera(2, SourceKind::Finite, &quiet),
        ],
        Box::new(RecordingTransport::default()),
        store.clone(),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();
    assert_eq!(sentinel.camera_ids(), vec![0, 1, 2]);

    let frames = sentinel.frames();
    assert!(wait_until(Duration::from_secs(5), || {
        store.len() >= 2 && frames.len() == 3
    }));
    let report = sentinel.shutdown();

    assert!(store.events_for(1).is_empty());
    assert!(store.events_for(2).is_empty());
    assert!(!store.events_for(0).is_empty());

    // 检测失败的摄像头照常出画面, 只是没有人
    let failing = report.workers.iter().find(|w| w.camera_id == 1).unwrap();
    let stats = failing.stats.as_ref().unwrap();
    assert!(stats.detector_failures > 0);
    assert_eq!(stats.events, 0);
    assert!(stats.frames > 0);
}

#[test]
fn test_finite_source_rewinds() {
    let script = script(&[&[], &[], &[]]);
    let source = ScriptedSource::new(SourceKind::Finite, &script);
    let rewinds = source.rewinds.clone();

    let sentinel = Sentinel::start(
        fast_options(),
        vec![CameraSetup {
            camera_id: 0,
            source: Box::new(source),
            detector: Box::new(ScriptedDetector::new(&script)),
        }],
        Box::new(RecordingTransport::default()),
        Arc::new(MemoryStore::default()),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        rewinds.load(Ordering::Relaxed) >= 3
    }));
    let report = sentinel.shutdown();
    let stats = report.workers[0].stats.as_ref().unwrap();
    assert!(stats.rewinds >= 3);
    assert!(stats.frames >= 9);
    assert_eq!(stats.capture_failures, 0);
}

#[test]
fn test_events_are_persisted_to_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("events.db");
    let store = Arc::new(SqliteEventStore::open(&path).unwrap());
    let script = walk_through();

    let sentinel = Sentinel::start(
        fast_options(),
        vec![scripted_camera(3, SourceKind::Finite, &script)],
        Box::new(RecordingTransport::default()),
        store.clone(),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        store.count().map_or(false, |n| n >= 2)
    }));
    let report = sentinel.shutdown();
    assert!(report.store_closed);
    assert!(store.is_closed());

    // 关闭后重新打开读取
    let reopened = SqliteEventStore::open(&path).unwrap();
    let mut records = reopened.recent(100).unwrap();
    records.reverse();
    assert_eq!(records.len() as u64, report.sink.stats.persisted);
    assert_eq!(records[0].camera_id, 3);
    assert_eq!(records[0].event_type, "ENTERED");
    assert_eq!(records[0].duration, None);
    assert_eq!(records[1].event_type, "LEFT");
    assert_eq!(records[1].duration, Some(5.0));
    assert_eq!(records[1].total_people, 0);
    reopened.close().unwrap();
}

#[test]
fn test_persist_failure_does_not_block_notifications() {
    let script = walk_through();
    let transport = RecordingTransport::default();
    let sent = transport.sent.clone();

    let sentinel = Sentinel::start(
        fast_options(),
        vec![scripted_camera(0, SourceKind::Finite, &script)],
        Box::new(transport),
        Arc::new(FailingStore),
        Arc::new(Annotator::without_font()),
    )
    .unwrap();

    assert!(wait_until(Duration::from_secs(5), || sent.lock().len() >= 4));
    let report = sentinel.shutdown();

    assert_eq!(report.sink.stats.persisted, 0);
    assert!(report.sink.stats.persist_failed >= 4);
    assert_eq!(report.sink.stats.delivered, sent.lock().len() as u64);
    assert!(sent.lock()[1].contains("LEFT"));
}
