//! 帧与最新帧仓库 (Frame Store)
//!
//! 每路摄像头只保留最近一帧, 覆盖写入, 不排队.
//! 写入是对整个 `Arc<Frame>` 的原子替换, 读者拿到的是不可变快照,
//! 因此读者永远看不到写了一半的帧.

use std::sync::Arc;

use chrono::Local;
use crossbeam_skiplist::SkipMap;
use image::RgbaImage;

use crate::presence::{CameraId, Timestamp};

/// 一帧图像 (RGBA)
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbaImage,
    /// 帧序号 (由采集源递增)
    pub seq: u64,
    pub captured_at: Timestamp,
}

impl Frame {
    pub fn new(image: RgbaImage, seq: u64) -> Self {
        Self {
            image,
            seq,
            captured_at: Local::now(),
        }
    }

    /// 从 RGBA 原始数据构建, 尺寸与数据长度不符时返回 None
    pub fn from_rgba(width: u32, height: u32, rgba: Vec<u8>, seq: u64) -> Option<Self> {
        RgbaImage::from_raw(width, height, rgba).map(|image| Self::new(image, seq))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// 最新帧仓库 (按摄像头编号)
///
/// 克隆代价很低, 所有克隆共享同一份数据; 由运行时创建后注入到各采集线程与预览端.
#[derive(Clone, Default)]
pub struct FrameStore {
    frames: Arc<SkipMap<CameraId, Arc<Frame>>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发布最新帧, 替换旧值
    pub fn publish(&self, camera_id: CameraId, frame: Frame) {
        self.frames.insert(camera_id, Arc::new(frame));
    }

    /// 读取某路摄像头的最新帧快照
    pub fn latest(&self, camera_id: CameraId) -> Option<Arc<Frame>> {
        self.frames
            .get(&camera_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// 已有画面的摄像头编号 (升序)
    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.frames.iter().map(|entry| *entry.key()).collect()
    }

    /// 所有摄像头最新帧快照 (升序)
    pub fn snapshot(&self) -> Vec<(CameraId, Arc<Frame>)> {
        self.frames
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
