//! 人员进出状态机 (每路摄像头一个)
//!
//! 每帧调用一次 `update`, 按帧到达顺序:
//! 1. 确认离开: 待离开时间 >= 缓冲时间 → LEFT
//! 2. 新进入:   未见过的ID → ENTERED
//! 3. 重新出现: 待离开的ID再次出现 → 恢复在场, 保留原进入时间, 不发事件
//! 4. 消失:     在场ID本帧缺失 → 待离开 (暂不发事件)
//!
//! 跟踪器的ID闪烁(短暂丢失又出现)在第3步被静默吸收.

use std::collections::BTreeMap;

use chrono::Duration;

use super::{CameraId, PresenceEvent, Timestamp, TrackId, TrackObservation};

/// 单个跟踪ID的状态
///
/// 所有状态存放在同一个 map 中, 一个ID同一时刻只可能处于一种状态.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackState {
    /// 在场
    Active { entry_time: Timestamp },
    /// 待离开 (exit_time: 首次发现缺失的时刻)
    PendingExit {
        entry_time: Timestamp,
        exit_time: Timestamp,
    },
}

impl TrackState {
    pub fn is_active(&self) -> bool {
        matches!(self, TrackState::Active { .. })
    }
}

/// 人员进出跟踪器
pub struct PresenceTracker {
    camera_id: CameraId,
    exit_buffer: Duration,
    states: BTreeMap<TrackId, TrackState>,
}

impl PresenceTracker {
    /// 创建跟踪器
    ///
    /// # 参数
    /// - `camera_id`: 所属摄像头
    /// - `exit_buffer_seconds`: 离开缓冲 (秒), 连续缺失超过该时长才确认离开
    pub fn new(camera_id: CameraId, exit_buffer_seconds: f64) -> Self {
        let millis = (exit_buffer_seconds.max(0.0) * 1000.0).round() as i64;
        Self {
            camera_id,
            exit_buffer: Duration::milliseconds(millis),
            states: BTreeMap::new(),
        }
    }

    pub fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    /// 当前人数估计 (在场 + 待离开)
    pub fn people_count(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn state(&self, track_id: TrackId) -> Option<&TrackState> {
        self.states.get(&track_id)
    }

    pub fn active_count(&self) -> usize {
        self.states.values().filter(|s| s.is_active()).count()
    }

    pub fn pending_exit_count(&self) -> usize {
        self.states.len() - self.active_count()
    }

    /// 处理一帧观测, 返回本帧产生的事件 (先离开, 后进入; 同类按ID升序)
    pub fn update(&mut self, observation: &TrackObservation) -> Vec<PresenceEvent> {
        let now = observation.timestamp;
        let present = &observation.track_ids;
        let mut events = Vec::new();

        // 1. 确认离开
        let expired: Vec<TrackId> = self
            .states
            .iter()
            .filter_map(|(&id, state)| match *state {
                TrackState::PendingExit { exit_time, .. } if now - exit_time >= self.exit_buffer => {
                    Some(id)
                }
                _ => None,
            })
            .collect();

        for id in expired {
            if let Some(TrackState::PendingExit {
                entry_time,
                exit_time,
            }) = self.states.remove(&id)
            {
                events.push(PresenceEvent::left(
                    self.camera_id,
                    id,
                    now,
                    seconds(exit_time - entry_time),
                    self.states.len(),
                ));
            }
        }

        // 2. 新进入
        for &id in present {
            if !self.states.contains_key(&id) {
                self.states.insert(id, TrackState::Active { entry_time: now });
                events.push(PresenceEvent::entered(
                    self.camera_id,
                    id,
                    now,
                    self.states.len(),
                ));
            }
        }

        // 3. 重新出现 / 4. 消失
        for (id, state) in self.states.iter_mut() {
            *state = match (*state, present.contains(id)) {
                (TrackState::PendingExit { entry_time, .. }, true) => {
                    TrackState::Active { entry_time }
                }
                (TrackState::Active { entry_time }, false) => TrackState::PendingExit {
                    entry_time,
                    exit_time: now,
                },
                (unchanged, _) => unchanged,
            };
        }

        events
    }
}

fn seconds(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}
