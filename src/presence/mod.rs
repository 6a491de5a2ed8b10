/// 人员进出判定 (Presence Tracking)
///
/// 把检测/跟踪器每帧输出的 track ID 集合,转换为稳定的"进入/离开"事件:
/// - Tracker: 每路摄像头一个状态机,带离开缓冲 (去抖动)
/// - Event:   不可变的进出事件,分发给通知与存储
pub mod tracker;

pub use tracker::{PresenceTracker, TrackState};

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

// ========== 基础类型 ==========

/// 摄像头编号
pub type CameraId = u32;

/// 跟踪ID (仅在单个摄像头的跟踪器实例内有效, 不是全局身份)
pub type TrackId = u32;

/// 时间戳 (本地时间, 与日志/数据库格式一致)
pub type Timestamp = DateTime<Local>;

// ========== 观测 ==========

/// 某一时刻的跟踪快照 (每处理一帧产生一次, 不持久化)
#[derive(Clone, Debug, PartialEq)]
pub struct TrackObservation {
    pub camera_id: CameraId,
    pub timestamp: Timestamp,
    pub track_ids: BTreeSet<TrackId>,
}

impl TrackObservation {
    pub fn new(
        camera_id: CameraId,
        timestamp: Timestamp,
        track_ids: impl IntoIterator<Item = TrackId>,
    ) -> Self {
        Self {
            camera_id,
            timestamp,
            track_ids: track_ids.into_iter().collect(),
        }
    }

    /// 无检测输出 = 本帧没有人
    pub fn empty(camera_id: CameraId, timestamp: Timestamp) -> Self {
        Self {
            camera_id,
            timestamp,
            track_ids: BTreeSet::new(),
        }
    }
}

// ========== 事件 ==========

/// 事件类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Entered,
    Left,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Entered => "ENTERED",
            EventType::Left => "LEFT",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 进出事件 (创建后不可变, 以值的形式交给通知与存储)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub camera_id: CameraId,
    pub event_type: EventType,
    pub person_track_id: TrackId,
    pub timestamp: Timestamp,
    /// 停留时长(秒), 仅 LEFT 事件有值
    pub duration: Option<f64>,
    /// 应用本事件后, 在场 + 待离开 的人数
    pub total_people_estimate: usize,
}

impl PresenceEvent {
    pub fn entered(
        camera_id: CameraId,
        track_id: TrackId,
        timestamp: Timestamp,
        total_people_estimate: usize,
    ) -> Self {
        Self {
            camera_id,
            event_type: EventType::Entered,
            person_track_id: track_id,
            timestamp,
            duration: None,
            total_people_estimate,
        }
    }

    pub fn left(
        camera_id: CameraId,
        track_id: TrackId,
        timestamp: Timestamp,
        duration: f64,
        total_people_estimate: usize,
    ) -> Self {
        Self {
            camera_id,
            event_type: EventType::Left,
            person_track_id: track_id,
            timestamp,
            duration: Some(duration),
            total_people_estimate,
        }
    }

    /// 通知文本
    pub fn message(&self) -> String {
        match self.event_type {
            EventType::Entered => format!(
                "Camera {}: Person {} ENTERED frame. Total people: {}",
                self.camera_id, self.person_track_id, self.total_people_estimate
            ),
            EventType::Left => format!(
                "Camera {}: Person {} LEFT frame after {:.1}s. Total people: {}",
                self.camera_id,
                self.person_track_id,
                self.duration.unwrap_or_default(),
                self.total_people_estimate
            ),
        }
    }
}

impl fmt::Display for PresenceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entered_message() {
        let event = PresenceEvent::entered(2, 7, Local::now(), 3);
        assert_eq!(
            event.message(),
            "Camera 2: Person 7 ENTERED frame. Total people: 3"
        );
        assert_eq!(event.duration, None);
    }

    #[test]
    fn test_left_message() {
        let event = PresenceEvent::left(0, 9, Local::now(), 12.34, 0);
        assert_eq!(
            event.message(),
            "Camera 0: Person 9 LEFT frame after 12.3s. Total people: 0"
        );
    }

    #[test]
    fn test_event_type_serializes_uppercase() {
        let json = serde_json::to_string(&EventType::Left).unwrap();
        assert_eq!(json, "\"LEFT\"");
    }

    #[test]
    fn test_observation_dedups_ids() {
        let obs = TrackObservation::new(0, Local::now(), [3, 1, 3, 2]);
        assert_eq!(obs.track_ids.into_iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
