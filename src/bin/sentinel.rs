/// 多路人员进出监控 (无界面)
///
/// 系统架构:
/// 1. 采集线程: 每路摄像头一个, 读帧 + 检测跟踪 + 进出判定
/// 2. 通知线程: 发送 Telegram 消息 (尽力而为)
/// 3. 存储线程: 写入 SQLite
/// 4. 主线程:   等待 `q` 或运行时长到期, 然后按顺序关闭
use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{bounded, RecvTimeoutError};
use mimalloc::MiMalloc;
use tracing::{info, warn};

use presence_sentinel::config::default_data_dir;
use presence_sentinel::events::SqliteEventStore;
use presence_sentinel::logging::init_tracing;
use presence_sentinel::{launch, SentinelConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(author, version, about = "多路摄像头人员进出监控", long_about = None)]
struct Cli {
    /// 配置文件 (JSON, 不存在时写出默认配置)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 启动监控
    Run(RunArgs),
    /// 打印最近的进出记录 (JSON)
    Logs {
        /// 条数
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
        /// 数据库文件 (默认取配置)
        #[arg(long)]
        database: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// 输入源, 可重复: 设备号 / rtsp 地址 / 视频文件 (覆盖配置)
    #[arg(short, long = "source")]
    sources: Vec<String>,

    /// YOLOv8 ONNX 模型
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// 离开缓冲 (秒)
    #[arg(long)]
    exit_buffer: Option<f64>,

    /// 数据库文件
    #[arg(long)]
    database: Option<PathBuf>,

    /// 运行时长 (秒), 不指定则一直运行直到输入 q
    #[arg(short, long, value_parser = parse_seconds)]
    duration: Option<Duration>,

    /// 日志级别 (RUST_LOG 优先)
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, env = "SENTINEL_TELEGRAM_TOKEN", hide_env_values = true)]
    telegram_token: Option<String>,

    #[arg(long, env = "SENTINEL_TELEGRAM_CHAT_ID")]
    telegram_chat_id: Option<String>,
}

impl RunArgs {
    /// 命令行参数覆盖配置文件
    fn apply(self, config: &mut SentinelConfig) {
        if !self.sources.is_empty() {
            config.cameras = self.sources;
        }
        if let Some(model) = self.model {
            config.detector.model_path = model;
        }
        if let Some(seconds) = self.exit_buffer {
            config.presence.exit_buffer_seconds = seconds;
        }
        if let Some(database) = self.database {
            config.storage.database_path = database;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(token) = self.telegram_token {
            config.notifier.telegram_bot_token = Some(token);
        }
        if let Some(chat_id) = self.telegram_chat_id {
            config.notifier.telegram_chat_id = Some(chat_id);
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .unwrap_or_else(|| default_data_dir().join("config.json"));
    let mut config = SentinelConfig::load(&config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.display()))?;

    match cli.command {
        Command::Run(args) => {
            let duration = args.duration;
            args.apply(&mut config);
            run(config, duration)
        }
        Command::Logs { limit, database } => {
            let path = database.unwrap_or(config.storage.database_path);
            print_logs(&path, limit)
        }
    }
}

/// 解析秒数, 负数/非数/溢出都报错
fn parse_seconds(raw: &str) -> Result<Duration> {
    let seconds: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("不是有效的秒数: {}", raw))?;
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| anyhow::anyhow!("秒数超出范围: {} ({})", raw, e))
}

fn run(config: SentinelConfig, duration: Option<Duration>) -> Result<()> {
    let _guard = init_tracing(&config.logging.level, config.logging.log_dir.as_deref())
        .context("初始化日志失败")?;
    config.log_summary();

    let (sentinel, _store) = launch(&config).context("启动失败")?;
    info!("✅ 系统就绪, 输入 q 回车退出");

    wait_for_quit(duration);

    let stats = sentinel.sink_stats();
    info!(
        "🛑 开始关闭: 运行中采集线程 {}, 已发布事件 {}",
        sentinel.running_workers(),
        stats.published
    );
    let report = sentinel.shutdown();
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_clean() {
        warn!("⚠️ 部分线程未在期限内退出");
    }
    Ok(())
}

/// 等待 stdin 输入 q, 或运行时长到期
fn wait_for_quit(duration: Option<Duration>) {
    let (tx, rx) = bounded::<()>(1);
    let spawned = std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                        let _ = tx.send(());
                        return;
                    }
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        });
    if let Err(e) = spawned {
        warn!("⚠️ 无法监听标准输入: {}", e);
    }

    let deadline = duration.and_then(|d| Instant::now().checked_add(d));
    loop {
        let wait = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    info!("⏱️ 运行时长已到");
                    return;
                }
                remaining.min(Duration::from_secs(1))
            }
            None => Duration::from_secs(1),
        };
        match rx.recv_timeout(wait) {
            Ok(()) => {
                info!("⌨️ 收到退出指令");
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
            // stdin 已关闭, 只能等运行时长到期
            Err(RecvTimeoutError::Disconnected) => match deadline {
                Some(deadline) => {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                }
                None => std::thread::sleep(Duration::from_secs(1)),
            },
        }
    }
}

fn print_logs(path: &std::path::Path, limit: usize) -> Result<()> {
    if !path.is_file() {
        anyhow::bail!("数据库不存在: {}", path.display());
    }
    let store = SqliteEventStore::open(path)
        .with_context(|| format!("打开数据库失败: {}", path.display()))?;
    let records = store.recent(limit).context("查询记录失败")?;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}
