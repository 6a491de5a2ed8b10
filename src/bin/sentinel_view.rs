/// 多路画面预览 (macroquad)
///
/// 与 `sentinel run` 使用同一套运行时, 额外在窗口中显示:
/// - 每路摄像头的最新画面 (网格排列)
/// - 最近 10 条进出记录
///
/// Esc 退出并按顺序关闭.
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use macroquad::prelude::*;
use tracing_appender::non_blocking::WorkerGuard;

use presence_sentinel::config::default_data_dir;
use presence_sentinel::events::{EventRecord, SqliteEventStore};
use presence_sentinel::logging::init_tracing;
use presence_sentinel::{launch, CameraId, Frame, FrameStore, SentinelConfig, Sentinel};

/// 底部事件列表条数
const RECENT_EVENTS: usize = 10;

/// 事件列表刷新间隔
const EVENTS_REFRESH: Duration = Duration::from_secs(1);

const EVENT_LINE_HEIGHT: f32 = 18.0;

#[derive(Parser, Debug)]
#[command(author, version, about = "多路人员进出监控 - 画面预览", long_about = None)]
struct Args {
    /// 配置文件 (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 输入源, 可重复 (覆盖配置)
    #[arg(short, long = "source")]
    sources: Vec<String>,

    /// YOLOv8 ONNX 模型
    #[arg(short, long)]
    model: Option<PathBuf>,
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Presence Sentinel".to_string(),
        window_width: 1280,
        window_height: 800,
        high_dpi: false,
        window_resizable: true,
        ..Default::default()
    }
}

/// 单路画面纹理
struct CameraTexture {
    texture: Texture2D,
    /// 已上传的那一次发布 (倒回后帧序号会重复, 只能按快照本身比较)
    frame: Arc<Frame>,
}

struct Viewer {
    frames: FrameStore,
    store: Arc<SqliteEventStore>,
    textures: BTreeMap<CameraId, CameraTexture>,
    events: Vec<EventRecord>,
    events_refreshed: Option<Instant>,
}

impl Viewer {
    fn new(frames: FrameStore, store: Arc<SqliteEventStore>) -> Self {
        Self {
            frames,
            store,
            textures: BTreeMap::new(),
            events: Vec::new(),
            events_refreshed: None,
        }
    }

    /// 只在有新发布的帧时上传纹理
    fn update(&mut self) {
        for (camera_id, frame) in self.frames.snapshot() {
            let (width, height) = (frame.width() as u16, frame.height() as u16);
            match self.textures.get_mut(&camera_id) {
                Some(cached) if Arc::ptr_eq(&cached.frame, &frame) => {}
                Some(cached)
                    if cached.texture.width() == width as f32
                        && cached.texture.height() == height as f32 =>
                {
                    cached.texture.update(&Image {
                        bytes: frame.image.as_raw().clone(),
                        width,
                        height,
                    });
                    cached.frame = frame;
                }
                _ => {
                    // 首帧或分辨率变化时重建纹理
                    let texture = Texture2D::from_rgba8(width, height, frame.image.as_raw());
                    texture.set_filter(FilterMode::Linear);
                    self.textures.insert(
                        camera_id,
                        CameraTexture { texture, frame },
                    );
                }
            }
        }

        let stale = self
            .events_refreshed
            .map_or(true, |at| at.elapsed() >= EVENTS_REFRESH);
        if stale {
            match self.store.recent(RECENT_EVENTS) {
                Ok(events) => self.events = events,
                Err(e) => tracing::warn!("⚠️ 查询最近记录失败: {}", e),
            }
            self.events_refreshed = Some(Instant::now());
        }
    }

    fn draw(&self) {
        clear_background(BLACK);

        let events_height = EVENT_LINE_HEIGHT * (RECENT_EVENTS as f32 + 1.5);
        let grid_height = (screen_height() - events_height).max(EVENT_LINE_HEIGHT);
        let count = self.textures.len().max(1);
        let cols = (count as f32).sqrt().ceil() as usize;
        let rows = count.div_ceil(cols);
        let cell_w = screen_width() / cols as f32;
        let cell_h = grid_height / rows as f32;

        for (index, cached) in self.textures.values().enumerate() {
            let texture = &cached.texture;
            let (col, row) = (index % cols, index / cols);
            // 等比缩放, 居中到格子里
            let scale = (cell_w / texture.width()).min(cell_h / texture.height());
            let (w, h) = (texture.width() * scale, texture.height() * scale);
            let x = col as f32 * cell_w + (cell_w - w) / 2.0;
            let y = row as f32 * cell_h + (cell_h - h) / 2.0;
            draw_texture_ex(
                texture,
                x,
                y,
                WHITE,
                DrawTextureParams {
                    dest_size: Some(vec2(w, h)),
                    ..Default::default()
                },
            );
        }

        if self.textures.is_empty() {
            draw_text("Waiting for frames...", 20.0, grid_height / 2.0, 28.0, GRAY);
        }

        // 默认字体不含中文, 窗口内文字用英文
        let mut y = grid_height + EVENT_LINE_HEIGHT;
        draw_text("Recent events", 10.0, y, 20.0, YELLOW);
        for record in &self.events {
            y += EVENT_LINE_HEIGHT;
            let duration = record
                .duration
                .map(|d| format!(" ({:.1}s)", d))
                .unwrap_or_default();
            let line = format!(
                "{}  Camera {}  {} #{}{}  people={}",
                record.timestamp,
                record.camera_id,
                record.event_type,
                record.person_id,
                duration,
                record.total_people
            );
            let color = if record.event_type == "ENTERED" { GREEN } else { ORANGE };
            draw_text(&line, 10.0, y, 18.0, color);
        }

        draw_text(
            &format!("FPS: {}  [Esc] quit", get_fps()),
            screen_width() - 180.0,
            screen_height() - 8.0,
            18.0,
            WHITE,
        );
    }
}

fn start(args: Args) -> Result<(Sentinel, Arc<SqliteEventStore>, Option<WorkerGuard>)> {
    let config_path = args
        .config
        .unwrap_or_else(|| default_data_dir().join("config.json"));
    let mut config = SentinelConfig::load(&config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.display()))?;
    if !args.sources.is_empty() {
        config.cameras = args.sources;
    }
    if let Some(model) = args.model {
        config.detector.model_path = model;
    }

    let guard = init_tracing(&config.logging.level, config.logging.log_dir.as_deref())
        .context("初始化日志失败")?;
    config.log_summary();

    let (sentinel, store) = launch(&config).context("启动失败")?;
    Ok((sentinel, store, guard))
}

#[macroquad::main(window_conf)]
async fn main() {
    let args = Args::parse();
    let (sentinel, store, _guard) = match start(args) {
        Ok(started) => started,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        }
    };

    let mut viewer = Viewer::new(sentinel.frames(), store);
    loop {
        if is_key_pressed(KeyCode::Escape) {
            break;
        }
        viewer.update();
        viewer.draw();
        next_frame().await;
    }

    let report = sentinel.shutdown();
    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("❌ {}", e),
    }
}
