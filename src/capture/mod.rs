/// 视频采集模块
/// Video capture sources
///
/// - 实时源 (本地摄像头 / RTSP / HTTP 流): 读帧失败时由采集线程重试
/// - 有限源 (视频文件): 读到结尾后倒回开头循环播放
pub mod ffmpeg;

pub use ffmpeg::{list_video_devices, FfmpegSource};

use std::time::Duration;

use crate::config::SourceSpec;
use crate::error::Result;
use crate::frame::Frame;

/// 输入源类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Live,
    Finite,
}

impl SourceKind {
    /// 画面状态栏中显示的标签
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Live => "CAMERA",
            SourceKind::Finite => "VIDEO",
        }
    }
}

/// 采集源
///
/// 由采集线程独占, 线程结束时随之析构并释放设备.
pub trait CaptureSource: Send {
    fn kind(&self) -> SourceKind;

    /// 人类可读的来源描述 (设备号 / 地址 / 文件路径)
    fn describe(&self) -> String;

    /// 读取下一帧
    ///
    /// - `Ok(Some(frame))`: 新的一帧
    /// - `Ok(None)`: 有限源已到结尾
    /// - `Err(_)`: 读取失败 (实时源会被重试)
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// 回到开头 (仅对有限源有意义)
    fn rewind(&mut self) -> Result<()>;
}

/// 按配置打开采集源
pub fn open_source(spec: &SourceSpec, frame_timeout: Duration) -> Result<Box<dyn CaptureSource>> {
    Ok(Box::new(FfmpegSource::open(spec.clone(), frame_timeout)?))
}
