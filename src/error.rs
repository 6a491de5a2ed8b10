//! 错误类型
//! Error types for presence-sentinel

use std::io;
use thiserror::Error;

/// 统一的 Result 别名
pub type Result<T> = std::result::Result<T, SentinelError>;

/// 系统错误
///
/// 按来源划分: 采集 / 检测 / 通知 / 存储 / 配置.
/// 任何一路摄像头的错误都只在本路内部处理,不会传播到其他摄像头或事件分发线程.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// 视频采集失败 (读帧失败, 设备被占用, 网络断开)
    #[error("capture error: {0}")]
    Capture(String),

    /// 检测器/跟踪器失败
    #[error("detector error: {0}")]
    Detector(String),

    /// 通知发送失败
    #[error("notification error: {0}")]
    Notify(String),

    /// 事件存储失败
    #[error("store error: {0}")]
    Store(String),

    /// 配置无效
    #[error("config error: {0}")]
    Config(String),

    /// 等待超时
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("ONNX runtime error: {0}")]
    Onnx(#[from] ort::Error),

    #[error("tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl SentinelError {
    /// 是否为可重试的采集错误 (超时/断流)
    pub fn is_transient(&self) -> bool {
        matches!(self, SentinelError::Capture(_) | SentinelError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SentinelError::Capture("eof".into()).is_transient());
        assert!(SentinelError::Timeout("frame".into()).is_transient());
        assert!(!SentinelError::Store("locked".into()).is_transient());
    }

    #[test]
    fn test_io_conversion() {
        let err: SentinelError = io::Error::new(io::ErrorKind::NotFound, "x").into();
        assert!(err.to_string().starts_with("IO error"));
    }
}
