//! 画面叠加: 检测框 / 跟踪ID / 状态栏

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{debug, warn};

use crate::capture::SourceKind;
use crate::detector::TrackedBox;
use crate::error::{Result, SentinelError};
use crate::presence::CameraId;

/// 状态栏基础字号 (像素)
const BASE_SCALE: f32 = 20.0;

/// 最小字号比例
const MIN_SCALE_RATIO: f32 = 0.5;

const STATUS_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// 未指定字体时依次尝试的系统字体
const FALLBACK_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// 状态栏内容
#[derive(Clone, Debug, PartialEq)]
pub struct StatusLine {
    pub camera_id: CameraId,
    pub kind: SourceKind,
    pub people: usize,
    pub fps: f64,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Camera {} ({}) - ", self.camera_id, self.kind.label())?;
        if self.people > 0 {
            write!(f, "People: {}", self.people)?;
        } else {
            f.write_str("No People")?;
        }
        write!(f, " - FPS: {:.1}", self.fps)
    }
}

/// 画面标注器 (所有采集线程共享一份字体)
#[derive(Default)]
pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// 加载字体; 未指定时尝试常见系统字体, 都没有则只画色块
    pub fn load(font_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = font_path {
            return Ok(Self {
                font: Some(read_font(path)?),
            });
        }

        let font = FALLBACK_FONTS
            .iter()
            .map(PathBuf::from)
            .filter(|p| p.is_file())
            .find_map(|p| read_font(&p).ok());
        if font.is_none() {
            warn!("⚠️ 未找到可用字体, 画面上只显示状态色块");
        }
        Ok(Self { font })
    }

    /// 不带字体 (只画框与色块)
    pub fn without_font() -> Self {
        Self::default()
    }

    /// 绘制跟踪框与ID
    pub fn draw_boxes(&self, image: &mut RgbaImage, boxes: &[TrackedBox]) {
        let (w, h) = (image.width() as f32, image.height() as f32);
        if w < 1.0 || h < 1.0 {
            return;
        }
        for tracked in boxes {
            let b = &tracked.bbox;
            let x1 = b.x1.clamp(0.0, w - 1.0);
            let y1 = b.y1.clamp(0.0, h - 1.0);
            let bw = (b.x2.min(w) - x1).max(1.0) as u32;
            let bh = (b.y2.min(h) - y1).max(1.0) as u32;
            let (r, g, bl) = tracked.color;
            let color = Rgba([r, g, bl, 255]);

            let rect = Rect::at(x1 as i32, y1 as i32).of_size(bw, bh);
            draw_hollow_rect_mut(image, rect, color);
            if bw > 2 && bh > 2 {
                let inner = Rect::at(x1 as i32 + 1, y1 as i32 + 1).of_size(bw - 2, bh - 2);
                draw_hollow_rect_mut(image, inner, color);
            }

            if let Some(font) = &self.font {
                let label = format!("ID {} {:.2}", tracked.track_id, b.confidence);
                let scale = PxScale::from(BASE_SCALE * 0.8);
                let (_, th) = text_size(scale, font, &label);
                let ty = (y1 as i32 - th as i32 - 2).max(0);
                draw_text_mut(image, color, x1 as i32, ty, scale, font, &label);
            }
        }
    }

    /// 绘制状态栏 (左上角, 超宽时缩小字号)
    pub fn draw_status(&self, image: &mut RgbaImage, status: &StatusLine) {
        let (w, h) = (image.width(), image.height());
        if w == 0 || h == 0 {
            return;
        }
        let baseline = 30.min(h.saturating_sub(10)) as i32;

        let Some(font) = &self.font else {
            // 无字体: 左上角色块, 有人时绿色
            let color = if status.people > 0 {
                STATUS_COLOR
            } else {
                Rgba([128, 128, 128, 255])
            };
            let size = 12.min(w).min(h);
            draw_filled_rect_mut(image, Rect::at(10.min(w as i32 - 1), 0).of_size(size, size), color);
            return;
        };

        let text = status.to_string();
        let scale = fit_scale(BASE_SCALE, w, |s| text_size(PxScale::from(s), font, &text).0);
        let (_, th) = text_size(PxScale::from(scale), font, &text);
        let y = (baseline - th as i32).max(0);
        draw_text_mut(image, STATUS_COLOR, 10, y, PxScale::from(scale), font, &text);
    }
}

fn read_font(path: &Path) -> Result<FontVec> {
    let bytes = fs::read(path)?;
    let font = FontVec::try_from_vec(bytes).map_err(|e| {
        SentinelError::Config(format!("invalid font {}: {}", path.display(), e))
    })?;
    debug!("字体已加载: {}", path.display());
    Ok(font)
}

/// 文字宽度超过画面 90% 时按比例缩小, 但不小于基础字号的一半
fn fit_scale(base: f32, frame_width: u32, measure: impl Fn(f32) -> u32) -> f32 {
    let max_width = frame_width as f32 * 0.9;
    let text_width = measure(base) as f32;
    let scale = if text_width > max_width && text_width > 0.0 {
        base * (max_width / text_width) * 0.9
    } else {
        base
    };
    scale.max(base * MIN_SCALE_RATIO)
}
