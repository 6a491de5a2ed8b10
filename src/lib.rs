// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
#![allow(clippy::type_complexity)]

//! 多路摄像头人员进出监控
//!
//! 每路摄像头一个采集线程: 读帧 → YOLOv8 检测 + ByteTrack 跟踪 → 进出判定 (带离开缓冲)
//! → 事件分发 (Telegram 通知 / SQLite 存储) → 叠加状态栏后写入最新帧仓库.

pub mod capture; // 视频采集 (摄像头 / RTSP / 视频文件)
pub mod config; // JSON 配置
pub mod detector; // 人员检测与跟踪
pub mod error;
pub mod events; // 事件分发: 通知 + 存储
pub mod frame; // 最新帧仓库
pub mod logging;
pub mod overlay; // 画面叠加
pub mod presence; // 进出判定状态机
pub mod runtime; // 启动与关闭编排
pub mod utils;
pub mod worker; // 采集线程

pub use crate::config::{SentinelConfig, SourceSpec};
pub use crate::error::{Result, SentinelError};
pub use crate::frame::{Frame, FrameStore};
pub use crate::presence::{
    CameraId, EventType, PresenceEvent, PresenceTracker, TrackId, TrackObservation,
};
pub use crate::runtime::{launch, RuntimeOptions, Sentinel, ShutdownReport};
