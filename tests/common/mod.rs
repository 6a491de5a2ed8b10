//! 集成测试用的采集源 / 检测器 / 通知 / 存储替身
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use image::RgbaImage;
use parking_lot::Mutex;

use presence_sentinel::capture::{CaptureSource, SourceKind};
use presence_sentinel::detector::{Detection, DetectorAdapter};
use presence_sentinel::events::{EventStore, NotificationTransport, SinkConfig};
use presence_sentinel::presence::Timestamp;
use presence_sentinel::runtime::RuntimeOptions;
use presence_sentinel::worker::{CameraSetup, WorkerOptions};
use presence_sentinel::{CameraId, Frame, PresenceEvent, Result, SentinelError, TrackId};

/// 每帧之间的模拟时间间隔
pub const FRAME_STEP_MS: i64 = 1000;

/// 一段按帧描述的画面内容: 第 i 帧里出现的跟踪ID
pub type Script = Arc<Vec<BTreeSet<TrackId>>>;

pub fn script(frames: &[&[TrackId]]) -> Script {
    Arc::new(
        frames
            .iter()
            .map(|ids| ids.iter().copied().collect())
            .collect(),
    )
}

/// 按脚本产生帧的采集源
///
/// 帧序号 = 脚本下标, 帧时间戳按 FRAME_STEP_MS 单调递增 (倒回后继续递增).
pub struct ScriptedSource {
    kind: SourceKind,
    len: usize,
    cursor: usize,
    ticks: i64,
    base: Timestamp,
    pace: Duration,
    pub rewinds: Arc<AtomicU64>,
}

impl ScriptedSource {
    pub fn new(kind: SourceKind, script: &Script) -> Self {
        Self {
            kind,
            len: script.len(),
            cursor: 0,
            ticks: 0,
            base: Local::now(),
            pace: Duration::from_millis(2),
            rewinds: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl CaptureSource for ScriptedSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("scripted ({} frames)", self.len)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.cursor >= self.len {
            return match self.kind {
                SourceKind::Finite => Ok(None),
                SourceKind::Live => Err(SentinelError::Capture("script exhausted".to_string())),
            };
        }
        thread::sleep(self.pace);
        let mut frame = Frame::new(RgbaImage::new(32, 24), self.cursor as u64);
        frame.captured_at = self.base + chrono::Duration::milliseconds(self.ticks * FRAME_STEP_MS);
        self.cursor += 1;
        self.ticks += 1;
        Ok(Some(frame))
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        self.rewinds.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// 读帧一直失败的实时源
pub struct BrokenSource;

impl CaptureSource for BrokenSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn describe(&self) -> String {
        "broken".to_string()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        Err(SentinelError::Capture("device unplugged".to_string()))
    }

    fn rewind(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 读帧时长时间阻塞且不响应停止信号的采集源
pub struct StuckSource {
    pub block_for: Duration,
}

impl CaptureSource for StuckSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn describe(&self) -> String {
        "stuck".to_string()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        thread::sleep(self.block_for);
        Ok(Some(Frame::new(RgbaImage::new(8, 8), 0)))
    }

    fn rewind(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 按帧序号查脚本的检测器
pub struct ScriptedDetector {
    script: Script,
}

impl ScriptedDetector {
    pub fn new(script: &Script) -> Self {
        Self {
            script: script.clone(),
        }
    }
}

impl DetectorAdapter for ScriptedDetector {
    fn detect_and_track(&mut self, frame: &Frame) -> Result<Detection> {
        let track_ids = self
            .script
            .get(frame.seq as usize)
            .cloned()
            .unwrap_or_default();
        Ok(Detection {
            track_ids,
            ..Default::default()
        })
    }
}

/// 每帧都失败的检测器
pub struct FailingDetector;

impl DetectorAdapter for FailingDetector {
    fn detect_and_track(&mut self, _frame: &Frame) -> Result<Detection> {
        Err(SentinelError::Detector("inference failed".to_string()))
    }
}

/// 记录所有通知文本, 可配置为总是失败
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub sent: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }
}

impl NotificationTransport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    fn send(&self, text: &str) -> Result<()> {
        if self.fail {
            return Err(SentinelError::Notify("network unreachable".to_string()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }
}

/// 内存事件存储, 记录调用顺序
#[derive(Default)]
pub struct MemoryStore {
    pub events: Mutex<Vec<PresenceEvent>>,
    /// "append" / "close" 调用序列
    pub calls: Mutex<Vec<&'static str>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn events_for(&self, camera_id: CameraId) -> Vec<PresenceEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.camera_id == camera_id)
            .cloned()
            .collect()
    }
}

impl EventStore for MemoryStore {
    fn append(&self, event: &PresenceEvent) -> Result<()> {
        self.calls.lock().push("append");
        if self.is_closed() {
            return Err(SentinelError::Store("closed".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.calls.lock().push("close");
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// 测试用运行时参数: 离开缓冲 2 秒 (模拟时间), 其余期限都很短
pub fn fast_options() -> RuntimeOptions {
    RuntimeOptions {
        worker: WorkerOptions {
            exit_buffer_seconds: 2.0,
            retry_delay: Duration::from_millis(20),
            draw_boxes: true,
        },
        sink: SinkConfig {
            notify_capacity: 64,
            persist_capacity: 256,
            publish_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(20),
            drain_timeout: Duration::from_millis(500),
        },
        worker_stop_timeout: Duration::from_secs(2),
    }
}

pub fn scripted_camera(camera_id: CameraId, kind: SourceKind, script: &Script) -> CameraSetup {
    CameraSetup {
        camera_id,
        source: Box::new(ScriptedSource::new(kind, script)),
        detector: Box::new(ScriptedDetector::new(script)),
    }
}

/// 轮询直到条件成立或超时
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// 每次写入都失败的存储
#[derive(Default)]
pub struct FailingStore;

impl EventStore for FailingStore {
    fn append(&self, _event: &PresenceEvent) -> Result<()> {
        Err(SentinelError::Store("disk full".to_string()))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
