//! 系统配置 - 通过JSON文件调整参数

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::capture::SourceKind;
use crate::error::{Result, SentinelError};

/// 默认数据目录 (数据库 / 日志)
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("presence-sentinel")
}

// ========== 输入源 ==========

/// 摄像头输入源
///
/// 配置中写成字符串: 纯数字 = 本地摄像头, rtsp/http 地址 = 网络流, 其余 = 视频文件
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSpec {
    Device(usize),
    Stream(String),
    File(PathBuf),
}

impl SourceSpec {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(index) = raw.parse::<usize>() {
            return SourceSpec::Device(index);
        }
        let lower = raw.to_ascii_lowercase();
        if ["rtsp://", "rtmp://", "http://", "https://"]
            .iter()
            .any(|scheme| lower.starts_with(scheme))
        {
            SourceSpec::Stream(raw.to_string())
        } else {
            SourceSpec::File(PathBuf::from(raw))
        }
    }

    /// 实时源 (摄像头/网络流) 还是有限源 (视频文件)
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::Device(_) | SourceSpec::Stream(_) => SourceKind::Live,
            SourceSpec::File(_) => SourceKind::Finite,
        }
    }
}

impl fmt::Display for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceSpec::Device(index) => write!(f, "device #{}", index),
            SourceSpec::Stream(url) => f.write_str(url),
            SourceSpec::File(path) => write!(f, "{}", path.display()),
        }
    }
}

// ========== 配置分节 ==========

/// 进出判定参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    pub exit_buffer_seconds: f64, // 离开缓冲(秒)
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            exit_buffer_seconds: 3.0,
        }
    }
}

/// ByteTrack参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ByteTrackConfig {
    pub max_lost_frames: u32,      // 最大丢失帧数
    pub high_score_threshold: f32, // 高分阈值
    pub low_score_threshold: f32,  // 低分阈值 (救援用)
    pub high_iou_threshold: f32,   // 高分IOU阈值
    pub low_iou_threshold: f32,    // 低分IOU阈值
    pub kalman_process_noise: f32, // 卡尔曼过程噪声 q
    pub kalman_obs_noise: f32,     // 卡尔曼观测噪声 r
}

impl Default for ByteTrackConfig {
    fn default() -> Self {
        Self {
            max_lost_frames: 60,
            high_score_threshold: 0.4,
            low_score_threshold: 0.1,
            high_iou_threshold: 0.4,
            low_iou_threshold: 0.3,
            kalman_process_noise: 0.1,
            kalman_obs_noise: 0.5,
        }
    }
}

/// 检测器参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,  // YOLOv8 ONNX 模型
    pub input_size: u32,      // 推理输入尺寸
    pub conf_threshold: f32,  // 检测置信度阈值
    pub iou_threshold: f32,   // NMS IOU阈值
    pub intra_threads: usize, // ONNX Runtime 线程数
    pub draw_boxes: bool,     // 是否在画面上绘制检测框
    pub bytetrack: ByteTrackConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            intra_threads: 2,
            draw_boxes: true,
            bytetrack: ByteTrackConfig::default(),
        }
    }
}

/// 通知参数 (Telegram)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub timeout_seconds: f64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            timeout_seconds: 5.0,
        }
    }
}

/// 通知超时上限 (秒)
pub const MAX_NOTIFY_TIMEOUT_SECONDS: f64 = 300.0;

impl NotifierConfig {
    /// 通知请求超时, 非法值回退到默认的 5 秒
    pub fn timeout(&self) -> Duration {
        let seconds = self.timeout_seconds.clamp(0.1, MAX_NOTIFY_TIMEOUT_SECONDS);
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::from_secs(5))
    }
}

/// 存储参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_data_dir().join("logs.db"),
        }
    }
}

/// 运行时参数 (队列容量 / 各种超时)
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub notify_queue_capacity: usize,
    pub persist_queue_capacity: usize,
    pub publish_timeout_ms: u64,     // 存储队列满时最多阻塞多久
    pub consumer_poll_ms: u64,       // 消费线程等待间隔
    pub drain_timeout_ms: u64,       // 关闭时排空队列的最长时间
    pub worker_stop_timeout_ms: u64, // 等待采集线程退出的最长时间
    pub retry_delay_ms: u64,         // 实时源读帧失败后的重试间隔
    pub frame_timeout_ms: u64,       // 单帧读取超时
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            notify_queue_capacity: 1024,
            persist_queue_capacity: 4096,
            publish_timeout_ms: 2000,
            consumer_poll_ms: 1000,
            drain_timeout_ms: 5000,
            worker_stop_timeout_ms: 5000,
            retry_delay_ms: 200,
            frame_timeout_ms: 5000,
        }
    }
}

impl RuntimeConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn consumer_poll(&self) -> Duration {
        Duration::from_millis(self.consumer_poll_ms.max(1))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn worker_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_stop_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms.max(1))
    }
}

/// 画面叠加参数
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub font_path: Option<PathBuf>, // TTF/OTF 字体, 为空则只画状态色块
}

/// 日志参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub log_dir: Option<PathBuf>, // 为空则只输出到终端
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: Some(default_data_dir().join("logs")),
        }
    }
}

// ========== 总配置 ==========

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// 输入源列表, 下标即摄像头编号
    pub cameras: Vec<String>,
    pub presence: PresenceConfig,
    pub detector: DetectorConfig,
    pub notifier: NotifierConfig,
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
    pub overlay: OverlayConfig,
    pub logging: LoggingConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            cameras: vec!["0".to_string()],
            presence: PresenceConfig::default(),
            detector: DetectorConfig::default(),
            notifier: NotifierConfig::default(),
            storage: StorageConfig::default(),
            runtime: RuntimeConfig::default(),
            overlay: OverlayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl SentinelConfig {
    /// 从JSON文件加载配置, 文件不存在时写出默认配置
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            info!("📝 配置文件不存在, 已创建默认配置: {}", path.display());
            return Ok(config);
        }

        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| SentinelError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        info!("✅ 配置已从 {} 加载", path.display());
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// 解析后的输入源 (摄像头编号, 输入源)
    pub fn sources(&self) -> Vec<(u32, SourceSpec)> {
        self.cameras
            .iter()
            .enumerate()
            .map(|(index, raw)| (index as u32, SourceSpec::parse(raw)))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.presence.exit_buffer_seconds.is_finite() || self.presence.exit_buffer_seconds < 0.0 {
            return Err(SentinelError::Config(format!(
                "exit_buffer_seconds must be >= 0, got {}",
                self.presence.exit_buffer_seconds
            )));
        }
        let timeout = self.notifier.timeout_seconds;
        if !timeout.is_finite() || timeout <= 0.0 || timeout > MAX_NOTIFY_TIMEOUT_SECONDS {
            return Err(SentinelError::Config(format!(
                "notifier timeout_seconds must be in (0, {}], got {}",
                MAX_NOTIFY_TIMEOUT_SECONDS, timeout
            )));
        }
        if self.runtime.notify_queue_capacity == 0 || self.runtime.persist_queue_capacity == 0 {
            return Err(SentinelError::Config(
                "event queue capacities must be > 0".to_string(),
            ));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(SentinelError::Config(format!(
                "detector input_size must be a positive multiple of 32, got {}",
                self.detector.input_size
            )));
        }
        if self.cameras.is_empty() {
            return Err(SentinelError::Config("no cameras configured".to_string()));
        }
        Ok(())
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前配置:");
        for (id, source) in self.sources() {
            info!("  摄像头 {}: {} ({})", id, source, source.kind().label());
        }
        info!("  离开缓冲: {:.1}s", self.presence.exit_buffer_seconds);
        info!(
            "  检测模型: {} ({}x{})",
            self.detector.model_path.display(),
            self.detector.input_size,
            self.detector.input_size
        );
        info!("  数据库: {}", self.storage.database_path.display());
        info!(
            "  Telegram通知: {}",
            if self.notifier.telegram_bot_token.is_some() {
                "已启用"
            } else {
                "未配置 (仅写日志)"
            }
        );
    }
}
