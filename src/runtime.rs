//! 运行时编排: 启动各路采集线程与事件分发, 按顺序关闭
//!
//! 关闭顺序:
//! 1. 通知所有采集线程停止, 在期限内等待退出
//! 2. 停止事件分发, 消费线程在期限内排空队列
//! 3. 两个消费线程退出后关闭事件存储

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{error, info, warn};

use crate::capture::open_source;
use crate::config::{SentinelConfig, SourceSpec};
use crate::detector::YoloTracker;
use crate::error::{Result, SentinelError};
use crate::events::{
    EventSink, EventStore, LogTransport, NotificationTransport, SinkConfig, SinkReport, SinkStats,
    SqliteEventStore, TelegramTransport,
};
use crate::frame::FrameStore;
use crate::overlay::Annotator;
use crate::presence::CameraId;
use crate::worker::{CameraHandle, CameraSetup, CameraWorker, WorkerOptions, WorkerStats};

/// 运行时参数
#[derive(Clone, Debug)]
pub struct RuntimeOptions {
    pub worker: WorkerOptions,
    pub sink: SinkConfig,
    /// 等待全部采集线程退出的总时长
    pub worker_stop_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self::from_config(&SentinelConfig::default())
    }
}

impl RuntimeOptions {
    pub fn from_config(config: &SentinelConfig) -> Self {
        Self {
            worker: WorkerOptions {
                exit_buffer_seconds: config.presence.exit_buffer_seconds,
                retry_delay: config.runtime.retry_delay(),
                draw_boxes: config.detector.draw_boxes,
            },
            sink: SinkConfig::from(&config.runtime),
            worker_stop_timeout: config.runtime.worker_stop_timeout(),
        }
    }
}

/// 单路摄像头的退出情况
#[derive(Clone, Debug, Serialize)]
pub struct WorkerReport {
    pub camera_id: CameraId,
    /// None = 未在期限内退出或异常退出
    pub stats: Option<WorkerStats>,
}

/// 关闭报告
#[derive(Clone, Debug, Serialize)]
pub struct ShutdownReport {
    pub workers: Vec<WorkerReport>,
    pub sink: SinkReport,
    pub store_closed: bool,
}

impl ShutdownReport {
    /// 所有线程都在期限内退出, 存储已关闭
    pub fn is_clean(&self) -> bool {
        self.workers.iter().all(|w| w.stats.is_some())
            && self.sink.notifier_exited
            && self.sink.persister_exited
            && self.store_closed
    }
}

/// 多路人员进出监控
pub struct Sentinel {
    frames: FrameStore,
    sink: EventSink,
    workers: Vec<CameraHandle>,
    store: Arc<dyn EventStore>,
    options: RuntimeOptions,
}

impl Sentinel {
    /// 启动事件分发与所有采集线程
    pub fn start(
        options: RuntimeOptions,
        cameras: Vec<CameraSetup>,
        transport: Box<dyn NotificationTransport>,
        store: Arc<dyn EventStore>,
        annotator: Arc<Annotator>,
    ) -> Result<Self> {
        let sink = EventSink::start(transport, store.clone(), options.sink.clone())?;
        let mut sentinel = Self {
            frames: FrameStore::new(),
            sink,
            workers: Vec::with_capacity(cameras.len()),
            store,
            options,
        };

        for setup in cameras {
            let camera_id = setup.camera_id;
            let spawned = CameraWorker::spawn(
                setup,
                sentinel.options.worker.clone(),
                sentinel.sink.publisher(),
                sentinel.frames.clone(),
                annotator.clone(),
            );
            match spawned {
                Ok(handle) => sentinel.workers.push(handle),
                Err(e) => {
                    error!("❌ 摄像头 {} 启动失败: {}", camera_id, e);
                    sentinel.shutdown();
                    return Err(e);
                }
            }
        }

        info!("🚀 已启动 {} 路摄像头", sentinel.workers.len());
        Ok(sentinel)
    }

    /// 最新帧仓库 (只读使用)
    pub fn frames(&self) -> FrameStore {
        self.frames.clone()
    }

    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.workers.iter().map(|w| w.camera_id()).collect()
    }

    pub fn sink_stats(&self) -> SinkStats {
        self.sink.stats()
    }

    /// 仍在运行的采集线程数
    pub fn running_workers(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_finished()).count()
    }

    /// 按顺序关闭, 每一步都有期限
    pub fn shutdown(self) -> ShutdownReport {
        let Sentinel {
            sink,
            workers,
            store,
            options,
            ..
        } = self;

        info!("🛑 正在关闭...");
        for worker in &workers {
            worker.signal_stop();
        }
        let deadline = Instant::now() + options.worker_stop_timeout;
        let workers: Vec<WorkerReport> = workers
            .into_iter()
            .map(|worker| {
                let camera_id = worker.camera_id();
                let remaining = deadline.saturating_duration_since(Instant::now());
                WorkerReport {
                    camera_id,
                    stats: worker.stop(remaining),
                }
            })
            .collect();

        let sink = sink.shutdown();
        if !sink.persister_exited {
            warn!("⚠️ 存储线程未退出, 仍然关闭数据库");
        }

        let store_closed = match store.close() {
            Ok(()) => true,
            Err(e) => {
                error!("❌ 关闭事件存储失败: {}", e);
                false
            }
        };

        let report = ShutdownReport {
            workers,
            sink,
            store_closed,
        };
        info!(
            "✅ 关闭完成: 发布 {} 个事件, 已存储 {}, 已通知 {}",
            report.sink.stats.published, report.sink.stats.persisted, report.sink.stats.delivered
        );
        report
    }
}

// ========== 按配置组装 ==========

/// 根据配置创建采集源与检测器
///
/// 视频文件不存在时跳过该路 (其余摄像头编号不变).
pub fn build_cameras(config: &SentinelConfig) -> Result<Vec<CameraSetup>> {
    let frame_timeout = config.runtime.frame_timeout();
    let mut cameras = Vec::new();

    for (camera_id, spec) in config.sources() {
        if let SourceSpec::File(path) = &spec {
            if !path.is_file() {
                warn!(
                    "⚠️ 摄像头 {} 的视频文件不存在, 已跳过: {}",
                    camera_id,
                    path.display()
                );
                continue;
            }
        }

        let source = open_source(&spec, frame_timeout)?;
        let detector = Box::new(YoloTracker::new(&config.detector)?);
        info!("📹 摄像头 {}: {} ({})", camera_id, spec, spec.kind().label());
        cameras.push(CameraSetup {
            camera_id,
            source,
            detector,
        });
    }

    if cameras.is_empty() {
        return Err(SentinelError::Config("no usable camera sources".to_string()));
    }
    Ok(cameras)
}

/// 根据配置选择通知通道: 配置了 Telegram 则发送, 否则只写日志
pub fn build_transport(config: &SentinelConfig) -> Result<Box<dyn NotificationTransport>> {
    let notifier = &config.notifier;
    match (&notifier.telegram_bot_token, &notifier.telegram_chat_id) {
        (Some(token), Some(chat_id)) => Ok(Box::new(TelegramTransport::new(
            token,
            chat_id,
            notifier.timeout(),
        )?)),
        (Some(_), None) | (None, Some(_)) => {
            warn!("⚠️ Telegram 配置不完整 (需要 token 与 chat_id), 通知只写日志");
            Ok(Box::new(LogTransport))
        }
        (None, None) => Ok(Box::new(LogTransport)),
    }
}

/// 按配置启动完整系统, 同时返回事件存储 (供查询最近事件)
pub fn launch(config: &SentinelConfig) -> Result<(Sentinel, Arc<SqliteEventStore>)> {
    config.validate()?;
    let store = Arc::new(SqliteEventStore::open(&config.storage.database_path)?);
    let transport = build_transport(config)?;
    let annotator = Arc::new(Annotator::load(config.overlay.font_path.as_deref())?);
    let cameras = build_cameras(config)?;

    let sentinel = Sentinel::start(
        RuntimeOptions::from_config(config),
        cameras,
        transport,
        store.clone(),
        annotator,
    )?;
    Ok((sentinel, store))
}
