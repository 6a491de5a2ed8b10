//! 日志初始化 (tracing)
//!
//! - 终端: stderr, 带时间戳与线程名
//! - 文件: 可选, 按天滚动, 写入日志目录
//! - RUST_LOG 优先, 否则使用配置中的级别

use std::fs;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Result, SentinelError};

/// 日志文件名前缀 (实际文件名带日期后缀)
pub const LOG_FILE_PREFIX: &str = "sentinel.log";

/// 初始化全局日志
///
/// 返回的 guard 必须保留到程序退出, 否则文件日志的后台写线程会提前结束.
pub fn init_tracing(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| SentinelError::Config(format!("invalid log level '{}': {}", level, e)))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_names(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| SentinelError::Config(format!("tracing already initialized: {}", e)))?;

    Ok(guard)
}

/// 测试用日志 (只输出警告及以上, 重复调用无副作用)
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
