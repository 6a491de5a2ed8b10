//! 摄像头采集线程 (Camera Worker)
//!
//! 每路摄像头一个线程, 独占自己的采集源/检测器/进出状态机:
//! 读帧 → 检测跟踪 → 进出判定 → 发布事件 → 叠加状态栏 → 写入最新帧仓库

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::capture::{CaptureSource, SourceKind};
use crate::detector::{Detection, DetectorAdapter};
use crate::error::Result;
use crate::events::EventPublisher;
use crate::frame::{Frame, FrameStore};
use crate::overlay::{Annotator, StatusLine};
use crate::presence::{CameraId, PresenceTracker, TrackObservation};
use crate::utils::{join_with_timeout, FpsCounter};

/// 连续失败时, 每隔多少次打印一次日志
const FAILURE_LOG_EVERY: u64 = 50;

/// 一路摄像头的组成部分
pub struct CameraSetup {
    pub camera_id: CameraId,
    pub source: Box<dyn CaptureSource>,
    pub detector: Box<dyn DetectorAdapter>,
}

/// 采集线程参数
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    pub exit_buffer_seconds: f64,
    /// 实时源读帧失败后的重试间隔
    pub retry_delay: Duration,
    /// 是否绘制检测框
    pub draw_boxes: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            exit_buffer_seconds: 3.0,
            retry_delay: Duration::from_millis(200),
            draw_boxes: true,
        }
    }
}

/// 采集线程统计
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub frames: u64,
    pub events: u64,
    pub capture_failures: u64,
    pub detector_failures: u64,
    pub rewinds: u64,
}

// ========== 句柄 ==========

/// 采集线程句柄
pub struct CameraHandle {
    camera_id: CameraId,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<WorkerStats>>,
}

impl CameraHandle {
    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// 只发出停止信号, 不等待
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// 停止并等待线程退出, 最多等待 `timeout`
    ///
    /// 超时或线程 panic 时返回 None (超时的线程被分离).
    pub fn stop(mut self, timeout: Duration) -> Option<WorkerStats> {
        self.signal_stop();
        let handle = self.thread.take()?;
        match join_with_timeout(handle, timeout) {
            Ok(Some(stats)) => Some(stats),
            Ok(None) => {
                error!("❌ 摄像头 {} 采集线程异常退出", self.camera_id);
                None
            }
            Err(_detached) => {
                warn!(
                    "⚠️ 摄像头 {} 采集线程未在 {:?} 内退出, 已分离",
                    self.camera_id, timeout
                );
                None
            }
        }
    }
}

impl Drop for CameraHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}

// ========== 采集线程 ==========

pub struct CameraWorker {
    camera_id: CameraId,
    kind: SourceKind,
    source: Box<dyn CaptureSource>,
    detector: Box<dyn DetectorAdapter>,
    tracker: PresenceTracker,
    publisher: EventPublisher,
    frames: FrameStore,
    annotator: Arc<Annotator>,
    options: WorkerOptions,
    stop: Arc<AtomicBool>,
    fps: FpsCounter,
    stats: WorkerStats,
}

impl CameraWorker {
    /// 启动采集线程
    pub fn spawn(
        setup: CameraSetup,
        options: WorkerOptions,
        publisher: EventPublisher,
        frames: FrameStore,
        annotator: Arc<Annotator>,
    ) -> Result<CameraHandle> {
        let camera_id = setup.camera_id;
        let stop = Arc::new(AtomicBool::new(false));
        let worker = CameraWorker {
            camera_id,
            kind: setup.source.kind(),
            tracker: PresenceTracker::new(camera_id, options.exit_buffer_seconds),
            source: setup.source,
            detector: setup.detector,
            publisher,
            frames,
            annotator,
            options,
            stop: stop.clone(),
            fps: FpsCounter::default(),
            stats: WorkerStats::default(),
        };

        let thread = thread::Builder::new()
            .name(format!("camera-{}", camera_id))
            .spawn(move || worker.run())?;

        Ok(CameraHandle {
            camera_id,
            stop,
            thread: Some(thread),
        })
    }

    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn run(mut self) -> WorkerStats {
        let span = info_span!("camera", id = self.camera_id, source = %self.source.describe());
        let _enter = span.enter();
        info!("▶️ 采集线程启动 ({})", self.kind.label());

        let mut consecutive_failures = 0u64;
        let mut frames_since_rewind = 0u64;

        while !self.stopping() {
            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) if self.kind == SourceKind::Finite => {
                    if frames_since_rewind == 0 {
                        // 空文件或无法解码, 避免空转
                        warn!("⚠️ 视频没有可用帧, {:?} 后重试", self.options.retry_delay);
                        self.pause(self.options.retry_delay);
                    } else {
                        debug!("视频播放结束, 从头开始");
                    }
                    frames_since_rewind = 0;
                    self.stats.rewinds += 1;
                    if let Err(e) = self.source.rewind() {
                        self.stats.capture_failures += 1;
                        warn!("❌ 视频倒回失败: {}", e);
                        self.pause(self.options.retry_delay);
                    }
                    continue;
                }
                Ok(None) => {
                    self.capture_failed(&mut consecutive_failures, "stream ended");
                    continue;
                }
                Err(e) => {
                    let reason = if e.is_transient() {
                        e.to_string()
                    } else {
                        format!("{} (non-transient)", e)
                    };
                    self.capture_failed(&mut consecutive_failures, &reason);
                    continue;
                }
            };

            if consecutive_failures > 0 {
                info!("✅ 恢复读帧 (此前连续失败 {} 次)", consecutive_failures);
                consecutive_failures = 0;
            }
            frames_since_rewind += 1;
            self.process(frame);
        }

        // 线程结束时立即释放设备
        let CameraWorker { source, stats, .. } = self;
        drop(source);
        info!(
            "⏹️ 采集线程退出 (帧 {}, 事件 {}, 读帧失败 {}, 检测失败 {})",
            stats.frames, stats.events, stats.capture_failures, stats.detector_failures
        );
        stats
    }

    fn capture_failed(&mut self, consecutive: &mut u64, reason: &str) {
        self.stats.capture_failures += 1;
        *consecutive += 1;
        if *consecutive == 1 || *consecutive % FAILURE_LOG_EVERY == 0 {
            warn!(
                "⚠️ 读帧失败 (连续 {} 次): {}, {:?} 后重试",
                consecutive, reason, self.options.retry_delay
            );
        }
        self.pause(self.options.retry_delay);
    }

    /// 可被停止信号打断的等待
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.stopping() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(10)));
        }
    }

    fn process(&mut self, frame: Frame) {
        let detection = match self.detector.detect_and_track(&frame) {
            Ok(detection) => detection,
            Err(e) => {
                self.stats.detector_failures += 1;
                if self.stats.detector_failures == 1
                    || self.stats.detector_failures % FAILURE_LOG_EVERY == 0
                {
                    warn!(
                        "⚠️ 检测失败 (累计 {} 次), 本帧视为无人: {}",
                        self.stats.detector_failures, e
                    );
                }
                Detection::default()
            }
        };

        let observation = TrackObservation {
            camera_id: self.camera_id,
            timestamp: frame.captured_at,
            track_ids: detection.track_ids,
        };
        let events = self.tracker.update(&observation);
        for event in &events {
            info!("{}", event);
            self.publisher.publish(event);
        }
        self.stats.events += events.len() as u64;

        let fps = self.fps.tick();
        let mut image = detection.annotated.unwrap_or(frame.image);
        if self.options.draw_boxes {
            self.annotator.draw_boxes(&mut image, &detection.boxes);
        }
        let status = StatusLine {
            camera_id: self.camera_id,
            kind: self.kind,
            people: self.tracker.people_count(),
            fps,
        };
        self.annotator.draw_status(&mut image, &status);

        self.frames.publish(
            self.camera_id,
            Frame {
                image,
                seq: frame.seq,
                captured_at: frame.captured_at,
            },
        );
        self.stats.frames += 1;
    }
}
