// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! YOLOv8 人员检测 (ONNX Runtime)
//!
//! 输入:  [1, 3, S, S] RGB / 255, 等比缩放后左上对齐, 其余填充 144/255
//! 输出:  [1, 4 + nc, N], 前4行为 cx, cy, w, h (输入坐标系)

use std::path::Path;

use fast_image_resize as fr;
use image::RgbaImage;
use ndarray::{s, Array4, Axis, Ix3};
use ort::{GraphOptimizationLevel, Session};
use tracing::info;

use super::BBox;
use crate::config::DetectorConfig;
use crate::error::{Result, SentinelError};

/// COCO 类别: 0 = person
pub const PERSON_CLASS: usize = 0;

const CXYWH_OFFSET: usize = 4;

/// 填充颜色
const PAD_VALUE: f32 = 144.0 / 255.0;

pub struct YoloDetector {
    session: Session,
    input_name: String,
    output_name: String,
    input_size: u32,
    conf_threshold: f32,
    iou_threshold: f32,
    resizer: fr::Resizer,
}

impl YoloDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let path = config.model_path.as_path();
        if !path.is_file() {
            return Err(SentinelError::Detector(format!(
                "model not found: {}",
                path.display()
            )));
        }
        let session = build_session(path, config.intra_threads)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| SentinelError::Detector("model has no inputs".to_string()))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| SentinelError::Detector("model has no outputs".to_string()))?;

        // 跟踪器需要低分框做救援, 检测阈值取两者中较小者
        let conf_threshold = config
            .conf_threshold
            .min(config.bytetrack.low_score_threshold);

        info!(
            "✅ 检测模型已加载: {} (输入 {}x{}, conf {:.2}, iou {:.2})",
            path.display(),
            config.input_size,
            config.input_size,
            conf_threshold,
            config.iou_threshold
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            input_size: config.input_size,
            conf_threshold,
            iou_threshold: config.iou_threshold,
            resizer: fr::Resizer::new(),
        })
    }

    /// 检测一帧中的人, 返回原图坐标的检测框
    pub fn detect(&mut self, image: &RgbaImage) -> Result<Vec<BBox>> {
        let (input, ratio) = self.preprocess(image)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input.view()]?)?;
        let preds = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()?
            .into_dimensionality::<Ix3>()?;

        let mut boxes = Vec::new();
        let (w0, h0) = (image.width() as f32, image.height() as f32);
        for pred in preds.index_axis(Axis(0), 0).axis_iter(Axis(1)) {
            let classes = pred.slice(s![CXYWH_OFFSET..]);
            let Some((class_id, &confidence)) = classes
                .iter()
                .enumerate()
                .reduce(|best, x| if x.1 > best.1 { x } else { best })
            else {
                continue;
            };
            if class_id != PERSON_CLASS || confidence < self.conf_threshold {
                continue;
            }

            let cx = pred[0] / ratio;
            let cy = pred[1] / ratio;
            let w = pred[2] / ratio;
            let h = pred[3] / ratio;
            boxes.push(BBox {
                x1: (cx - w / 2.0).clamp(0.0, w0),
                y1: (cy - h / 2.0).clamp(0.0, h0),
                x2: (cx + w / 2.0).clamp(0.0, w0),
                y2: (cy + h / 2.0).clamp(0.0, h0),
                confidence,
                class_id: class_id as u32,
            });
        }

        non_max_suppression(&mut boxes, self.iou_threshold);
        Ok(boxes)
    }

    /// 等比缩放到输入尺寸 (左上对齐), 返回 NCHW 张量与缩放比例
    fn preprocess(&mut self, image: &RgbaImage) -> Result<(Array4<f32>, f32)> {
        let size = self.input_size as f32;
        let (w0, h0) = (image.width() as f32, image.height() as f32);
        let ratio = (size / w0).min(size / h0);
        let w1 = ((w0 * ratio).round() as u32).clamp(1, self.input_size);
        let h1 = ((h0 * ratio).round() as u32).clamp(1, self.input_size);

        let src = fr::images::ImageRef::new(
            image.width(),
            image.height(),
            image.as_raw(),
            fr::PixelType::U8x4,
        )
        .map_err(|e| SentinelError::Detector(format!("invalid frame buffer: {}", e)))?;
        let mut dst = fr::images::Image::new(w1, h1, fr::PixelType::U8x4);
        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Nearest),
            )
            .map_err(|e| SentinelError::Detector(format!("resize failed: {}", e)))?;

        let n = self.input_size as usize;
        let mut input = Array4::from_elem((1, 3, n, n), PAD_VALUE);
        let (w1, h1) = (w1 as usize, h1 as usize);
        for (i, px) in dst.buffer().chunks_exact(4).enumerate() {
            let (y, x) = (i / w1, i % w1);
            if y >= h1 {
                break;
            }
            input[[0, 0, y, x]] = px[0] as f32 / 255.0;
            input[[0, 1, y, x]] = px[1] as f32 / 255.0;
            input[[0, 2, y, x]] = px[2] as f32 / 255.0;
        }

        Ok((input, ratio))
    }
}

fn build_session(path: &Path, intra_threads: usize) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads.max(1))?
        .commit_from_file(path)?;
    Ok(session)
}

/// 非极大值抑制: 按置信度降序保留, 丢弃与已保留框 IOU 超过阈值的框
pub fn non_max_suppression(boxes: &mut Vec<BBox>, iou_threshold: f32) {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..boxes.len() {
        let suppressed = (0..kept).any(|prev| boxes[prev].iou(&boxes[index]) > iou_threshold);
        if !suppressed {
            boxes.swap(kept, index);
            kept += 1;
        }
    }
    boxes.truncate(kept);
}
