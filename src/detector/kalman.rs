//! 跟踪公共组件: 边界框卡尔曼滤波 / IOU / ID颜色

use super::BBox;

/// 静止判定阈值 (像素/帧)
const STATIONARY_THRESHOLD: f32 = 2.0;

/// 每帧保留的速度比例
const VELOCITY_DECAY: f32 = 0.95;

fn to_cxcywh(bbox: &BBox) -> [f32; 4] {
    [
        (bbox.x1 + bbox.x2) / 2.0,
        (bbox.y1 + bbox.y2) / 2.0,
        bbox.x2 - bbox.x1,
        bbox.y2 - bbox.y1,
    ]
}

fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> BBox {
    let w = w.max(1.0);
    let h = h.max(1.0);
    BBox {
        x1: cx - w / 2.0,
        y1: cy - h / 2.0,
        x2: cx + w / 2.0,
        y2: cy + h / 2.0,
        confidence: 1.0,
        class_id: 0,
    }
}

/// 简化卡尔曼滤波器 (单个边界框的位置/尺寸平滑)
///
/// 状态向量: [cx, cy, w, h, vx, vy, vw, vh], 协方差简化为对角阵
#[derive(Clone, Debug)]
pub struct KalmanBoxFilter {
    state: [f32; 8],
    p: [f32; 8],
    /// 过程噪声 (越小越平滑)
    q: f32,
    /// 观测噪声 (越大越信任预测)
    r: f32,
    stationary_frames: u32,
}

impl KalmanBoxFilter {
    pub fn new(bbox: &BBox, q: f32, r: f32) -> Self {
        let [cx, cy, w, h] = to_cxcywh(bbox);
        Self {
            state: [cx, cy, w, h, 0.0, 0.0, 0.0, 0.0],
            p: [10.0; 8],
            q,
            r,
            stationary_frames: 0,
        }
    }

    fn speed(&self) -> f32 {
        self.state[4].hypot(self.state[5])
    }

    /// 预测下一帧 (匀速模型 + 速度衰减)
    pub fn predict(&mut self) {
        let stationary = self.speed() < STATIONARY_THRESHOLD;

        let (pos_decay, size_decay) = if stationary {
            self.stationary_frames += 1;
            // 连续静止3帧后大幅衰减
            let d = if self.stationary_frames > 3 { 0.7 } else { VELOCITY_DECAY };
            (d, d)
        } else {
            self.stationary_frames = 0;
            (VELOCITY_DECAY, 0.98)
        };
        self.state[4] *= pos_decay;
        self.state[5] *= pos_decay;
        self.state[6] *= size_decay;
        self.state[7] *= size_decay;

        for i in 0..4 {
            self.state[i] += self.state[i + 4];
        }

        let q = if stationary { self.q * 0.5 } else { self.q };
        for p in self.p.iter_mut() {
            *p += q;
        }
    }

    /// 融合观测 (残差越大越信任预测)
    pub fn update(&mut self, bbox: &BBox) {
        let observed = to_cxcywh(bbox);
        let mut residual = [0.0f32; 4];
        for i in 0..4 {
            residual[i] = observed[i] - self.state[i];
        }

        let residual_norm = residual[0].hypot(residual[1]);
        let r = if residual_norm < STATIONARY_THRESHOLD {
            self.r * 0.3
        } else if residual_norm < 10.0 {
            self.r
        } else {
            self.r * 3.0
        };
        let velocity_gain = if residual_norm < STATIONARY_THRESHOLD { 0.3 } else { 1.0 };

        for i in 0..4 {
            let k_pos = self.p[i] / (self.p[i] + r);
            let k_vel = self.p[i + 4] / (self.p[i + 4] + r * 10.0);

            self.state[i] += k_pos * residual[i];
            self.state[i + 4] += k_vel * residual[i] * velocity_gain;

            self.p[i] *= 1.0 - k_pos;
            self.p[i + 4] *= 1.0 - k_vel;
        }

        if residual_norm >= STATIONARY_THRESHOLD {
            self.stationary_frames = 0;
        }
    }

    /// 当前估计的边界框
    pub fn state_bbox(&self) -> BBox {
        from_cxcywh(self.state[0], self.state[1], self.state[2], self.state[3])
    }

    /// 下一帧预测的边界框 (用于匹配)
    pub fn predicted_bbox(&self) -> BBox {
        from_cxcywh(
            self.state[0] + self.state[4],
            self.state[1] + self.state[5],
            self.state[2] + self.state[6],
            self.state[3] + self.state[7],
        )
    }
}

/// 两个边界框的IOU
pub fn compute_iou(a: &BBox, b: &BBox) -> f32 {
    let iw = a.x2.min(b.x2) - a.x1.max(b.x1);
    let ih = a.y2.min(b.y2) - a.y1.max(b.y1);
    if iw <= 0.0 || ih <= 0.0 {
        return 0.0;
    }

    let intersection = iw * ih;
    let union = a.width() * a.height() + b.width() * b.height() - intersection;
    if union <= 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// 根据ID生成颜色 (黄金角采样色相)
pub fn id_to_color(id: u32) -> (u8, u8, u8) {
    let hue = (id as f32 * 137.508) % 360.0;
    hsv_to_rgb(hue, 0.8, 0.9)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = match (h / 60.0) as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let to_u8 = |value: f32| ((value + m) * 255.0) as u8;
    (to_u8(r), to_u8(g), to_u8(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox {
            x1,
            y1,
            x2,
            y2,
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn test_iou() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((compute_iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(compute_iou(&a, &bbox(20.0, 20.0, 30.0, 30.0)), 0.0);

        let half = compute_iou(&a, &bbox(5.0, 0.0, 15.0, 10.0));
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_kalman_follows_motion() {
        let mut filter = KalmanBoxFilter::new(&bbox(0.0, 0.0, 20.0, 40.0), 0.1, 0.5);
        for step in 1..=20 {
            filter.predict();
            let dx = step as f32 * 5.0;
            filter.update(&bbox(dx, 0.0, dx + 20.0, 40.0));
        }
        let state = filter.state_bbox();
        let cx = (state.x1 + state.x2) / 2.0;
        assert!((cx - 110.0).abs() < 10.0, "cx = {}", cx);
        // 预测框应在运动方向上领先
        assert!(filter.predicted_bbox().x1 > state.x1);
    }

    #[test]
    fn test_id_colors_are_distinct() {
        assert_ne!(id_to_color(1), id_to_color(2));
        assert_eq!(id_to_color(7), id_to_color(7));
    }
}
