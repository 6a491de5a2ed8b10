//! ByteTrack 多目标跟踪
//!
//! 1. 高低分检测框分开处理
//! 2. 高分框优先与所有轨迹做 IOU 匹配
//! 3. 低分框只用来救援第一轮未匹配的轨迹
//! 4. 未匹配的高分框新建轨迹, 丢失过久的轨迹删除
//!
//! 纯运动模型, 不使用外观特征.

use super::kalman::{compute_iou, id_to_color, KalmanBoxFilter};
use super::BBox;
use crate::config::ByteTrackConfig;
use crate::presence::TrackId;

/// 单条轨迹
#[derive(Clone, Debug)]
pub struct TrackedPerson {
    pub id: TrackId,
    /// 卡尔曼平滑后的边界框
    pub bbox: BBox,
    /// 连续丢失帧数 (0 = 本帧匹配到检测框)
    pub frames_lost: u32,
    pub color: (u8, u8, u8),
    /// 累计匹配帧数
    pub hits: u32,
    /// 最近一次匹配的检测置信度
    pub score: f32,
    kalman: KalmanBoxFilter,
}

impl TrackedPerson {
    fn new(id: TrackId, detection: &BBox, config: &ByteTrackConfig) -> Self {
        let kalman = KalmanBoxFilter::new(
            detection,
            config.kalman_process_noise,
            config.kalman_obs_noise,
        );
        Self {
            id,
            bbox: kalman.state_bbox(),
            frames_lost: 0,
            color: id_to_color(id),
            hits: 1,
            score: detection.confidence,
            kalman,
        }
    }

    fn predict(&mut self) {
        self.kalman.predict();
        self.bbox = self.kalman.state_bbox();
    }

    fn hit(&mut self, detection: &BBox) {
        self.kalman.update(detection);
        self.bbox = self.kalman.state_bbox();
        self.frames_lost = 0;
        self.hits += 1;
        self.score = detection.confidence;
    }
}

/// ByteTrack 跟踪器
pub struct ByteTracker {
    tracks: Vec<TrackedPerson>,
    next_id: TrackId,
    config: ByteTrackConfig,
}

impl ByteTracker {
    pub fn new(config: &ByteTrackConfig) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 1,
            config: config.clone(),
        }
    }

    pub fn tracks(&self) -> &[TrackedPerson] {
        &self.tracks
    }

    /// 清空所有轨迹, ID从1重新开始
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.next_id = 1;
    }

    /// 处理一帧检测框, 返回当前所有轨迹 (含丢失中的)
    pub fn update(&mut self, detections: &[BBox]) -> &[TrackedPerson] {
        for track in &mut self.tracks {
            track.predict();
        }

        let (high, low): (Vec<usize>, Vec<usize>) = (0..detections.len())
            .filter(|&i| detections[i].confidence >= self.config.low_score_threshold)
            .partition(|&i| detections[i].confidence >= self.config.high_score_threshold);

        let mut det_used = vec![false; detections.len()];
        let mut track_used = vec![false; self.tracks.len()];

        // 第一轮: 高分检测 × 所有轨迹
        let all_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let first = self.greedy_match(detections, &high, &all_tracks, self.config.high_iou_threshold);
        for (d, t) in first {
            det_used[d] = true;
            track_used[t] = true;
            self.tracks[t].hit(&detections[d]);
        }

        // 第二轮: 低分检测 × 未匹配轨迹 (救援)
        let remaining: Vec<usize> = (0..self.tracks.len()).filter(|&t| !track_used[t]).collect();
        let second = self.greedy_match(detections, &low, &remaining, self.config.low_iou_threshold);
        for (d, t) in second {
            det_used[d] = true;
            track_used[t] = true;
            self.tracks[t].hit(&detections[d]);
        }

        for (t, used) in track_used.iter().enumerate() {
            if !used {
                self.tracks[t].frames_lost += 1;
            }
        }

        // 未匹配的高分检测 → 新轨迹
        for &d in &high {
            if !det_used[d] {
                let track = TrackedPerson::new(self.next_id, &detections[d], &self.config);
                self.tracks.push(track);
                self.next_id += 1;
            }
        }

        let max_lost = self.config.max_lost_frames;
        self.tracks.retain(|t| t.frames_lost <= max_lost);

        &self.tracks
    }

    /// 贪心 IOU 匹配, 返回 (检测下标, 轨迹下标)
    fn greedy_match(
        &self,
        detections: &[BBox],
        det_indices: &[usize],
        track_indices: &[usize],
        iou_threshold: f32,
    ) -> Vec<(usize, usize)> {
        if det_indices.is_empty() || track_indices.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        for &d in det_indices {
            for &t in track_indices {
                let iou = compute_iou(&detections[d], &self.tracks[t].kalman.predicted_bbox());
                if iou >= iou_threshold {
                    candidates.push((iou, d, t));
                }
            }
        }
        // IOU 从大到小
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut det_taken = vec![false; detections.len()];
        let mut track_taken = vec![false; self.tracks.len()];
        let mut assignments = Vec::new();
        for (_, d, t) in candidates {
            if !det_taken[d] && !track_taken[t] {
                det_taken[d] = true;
                track_taken[t] = true;
                assignments.push((d, t));
            }
        }
        assignments
    }
}
