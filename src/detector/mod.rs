/// 人员检测与跟踪 (Detector Adapter)
///
/// - yolo:      YOLOv8 ONNX 人员检测
/// - bytetrack: ByteTrack 多目标跟踪 (卡尔曼滤波 + 两轮IOU匹配)
/// - kalman:    边界框卡尔曼滤波 / IOU / 颜色工具
pub mod bytetrack;
pub mod kalman;
pub mod yolo;

pub use bytetrack::{ByteTracker, TrackedPerson};
pub use kalman::{compute_iou, id_to_color, KalmanBoxFilter};
pub use yolo::YoloDetector;

use std::collections::BTreeSet;

use image::RgbaImage;
use tracing::info;

use crate::config::DetectorConfig;
use crate::error::Result;
use crate::frame::Frame;
use crate::presence::TrackId;

// ========== 数据结构 ==========

/// 检测框 (原图坐标)
#[derive(Clone, Debug, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl BBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        compute_iou(self, other)
    }
}

/// 带跟踪ID的框 (用于画面标注)
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedBox {
    pub track_id: TrackId,
    pub bbox: BBox,
    pub color: (u8, u8, u8),
}

/// 一帧的检测跟踪结果
#[derive(Clone, Debug, Default)]
pub struct Detection {
    /// 本帧确实看到的跟踪ID
    pub track_ids: BTreeSet<TrackId>,
    /// 对应的框
    pub boxes: Vec<TrackedBox>,
    /// 检测器自带的标注画面 (为空时使用原始帧)
    pub annotated: Option<RgbaImage>,
}

// ========== 接口 ==========

/// 检测器适配层
///
/// 每路摄像头一个实例, 跟踪ID只在实例内部有效.
pub trait DetectorAdapter: Send {
    fn detect_and_track(&mut self, frame: &Frame) -> Result<Detection>;
}

// ========== YOLO + ByteTrack ==========

/// YOLOv8 检测 + ByteTrack 跟踪
pub struct YoloTracker {
    detector: YoloDetector,
    tracker: ByteTracker,
}

impl YoloTracker {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let detector = YoloDetector::new(config)?;
        let tracker = ByteTracker::new(&config.bytetrack);
        info!("✅ YOLO + ByteTrack 初始化完成");
        Ok(Self { detector, tracker })
    }
}

impl DetectorAdapter for YoloTracker {
    fn detect_and_track(&mut self, frame: &Frame) -> Result<Detection> {
        let bboxes = self.detector.detect(&frame.image)?;
        let tracked = self.tracker.update(&bboxes);
        Ok(detection_from_tracks(tracked))
    }
}

/// 只统计本帧匹配上检测框的轨迹; 仅靠预测维持的轨迹不算"看到"
fn detection_from_tracks(tracked: &[TrackedPerson]) -> Detection {
    let mut detection = Detection::default();
    for person in tracked.iter().filter(|p| p.frames_lost == 0) {
        detection.track_ids.insert(person.id);
        detection.boxes.push(TrackedBox {
            track_id: person.id,
            bbox: person.bbox.clone(),
            color: person.color,
        });
    }
    detection
}
