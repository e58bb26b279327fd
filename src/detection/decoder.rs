// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 检测输出解码
// 支持两种三维布局 + 一种二维(带objectness列)布局:
//   - classes-first: [1, 4+nc, num_boxes]  (YOLOv8, 需转置)
//   - boxes-first:   [1, num_boxes, 4+nc]  (YOLOv5 风格)
//   - flat 2-D:      [num_boxes, 5+nc]     (第4列为objectness)

use ndarray::{s, Array, ArrayView1, ArrayView2, Axis, Ix2, Ix3, IxDyn};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::types::RawCandidate;
use crate::error::DecodeError;

const CXYWH_OFFSET: usize = 4;
const OBJECTNESS_INDEX: usize = 4;
/// 第1维小于该值视为 classes-first 布局
const CLASSES_FIRST_MAX_CHANNELS: usize = 100;

/// 绝对坐标所在的坐标系
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// 已经是原始画面像素
    #[default]
    Frame,
    /// 网络输入分辨率像素,需按 画面/输入 比例缩放
    Input,
}

/// 解码器配置
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub conf_threshold: f32,
    pub absolute_coords: CoordinateSpace,
    /// 网络输入分辨率 (width, height)
    pub input_size: (u32, u32),
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.15,
            absolute_coords: CoordinateSpace::Frame,
            input_size: (crate::INF_SIZE, crate::INF_SIZE),
        }
    }
}

/// 检测解码器: 推理输出张量 → 候选框列表
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn set_conf(&mut self, val: f32) {
        self.config.conf_threshold = val;
    }

    /// 解码一帧推理输出
    ///
    /// 低于阈值的行、找不到有效类别的行、非有限值的行会被静默丢弃
    pub fn decode(
        &self,
        output: &Array<f32, IxDyn>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<RawCandidate>, DecodeError> {
        if output.is_empty() {
            return Err(DecodeError::Empty(output.shape().to_vec()));
        }

        let candidates = match output.ndim() {
            3 => {
                // 维度已检查,不会失败
                let preds = output
                    .view()
                    .into_dimensionality::<Ix3>()
                    .map_err(|_| DecodeError::UnsupportedRank(3))?;
                let channels = preds.shape()[1];
                let batch = preds.index_axis_move(Axis(0), 0);

                let rows = if channels < CLASSES_FIRST_MAX_CHANNELS {
                    debug!("classes-first layout {:?}, transposing", output.shape());
                    batch.reversed_axes()
                } else {
                    debug!("boxes-first layout {:?}", output.shape());
                    batch
                };
                self.decode_rows(rows, frame_width, frame_height)?
            }
            2 => {
                let rows = output
                    .view()
                    .into_dimensionality::<Ix2>()
                    .map_err(|_| DecodeError::UnsupportedRank(2))?;
                self.decode_objectness_rows(rows, frame_width, frame_height)?
            }
            rank => return Err(DecodeError::UnsupportedRank(rank)),
        };

        debug!(
            "decoded {} candidates above conf {:.2}",
            candidates.len(),
            self.config.conf_threshold
        );
        Ok(candidates)
    }

    /// 每行: [cx, cy, w, h, class scores...]
    fn decode_rows(
        &self,
        rows: ArrayView2<f32>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<RawCandidate>, DecodeError> {
        let cols = rows.ncols();
        if cols <= CXYWH_OFFSET {
            return Err(DecodeError::TooFewColumns {
                cols,
                min: CXYWH_OFFSET + 1,
            });
        }

        let mut data = Vec::new();
        for pred in rows.rows() {
            let clss = pred.slice(s![CXYWH_OFFSET..]);
            let Some((class_id, confidence)) = max_score(clss, 1.0) else {
                continue;
            };
            if confidence < self.config.conf_threshold {
                continue;
            }
            if let Some(candidate) =
                self.to_candidate(pred, class_id, confidence, frame_width, frame_height)
            {
                data.push(candidate);
            }
        }
        Ok(data)
    }

    /// 每行: [cx, cy, w, h, objectness, class scores...]
    /// 有效分数 = class score * objectness
    fn decode_objectness_rows(
        &self,
        rows: ArrayView2<f32>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<RawCandidate>, DecodeError> {
        let cols = rows.ncols();
        if cols <= OBJECTNESS_INDEX + 1 {
            return Err(DecodeError::TooFewColumns {
                cols,
                min: OBJECTNESS_INDEX + 2,
            });
        }

        let mut data = Vec::new();
        for pred in rows.rows() {
            let objectness = pred[OBJECTNESS_INDEX];
            if objectness.is_nan() || objectness < self.config.conf_threshold {
                continue;
            }
            let clss = pred.slice(s![OBJECTNESS_INDEX + 1..]);
            let Some((class_id, confidence)) = max_score(clss, objectness) else {
                continue;
            };
            if confidence < self.config.conf_threshold {
                continue;
            }
            if let Some(candidate) =
                self.to_candidate(pred, class_id, confidence, frame_width, frame_height)
            {
                data.push(candidate);
            }
        }
        Ok(data)
    }

    /// 中心点格式 → 左上角格式,并限制在画面内 (最小 1px)
    fn to_candidate(
        &self,
        pred: ArrayView1<f32>,
        class_id: usize,
        confidence: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<RawCandidate> {
        let (cx, cy, w, h) = (pred[0], pred[1], pred[2], pred[3]);
        if ![cx, cy, w, h].iter().all(|v| v.is_finite()) {
            return None;
        }

        let fw = frame_width as f32;
        let fh = frame_height as f32;
        let (sx, sy) = if cx <= 1.0 && cy <= 1.0 {
            // 归一化坐标 [0,1]
            (fw, fh)
        } else {
            match self.config.absolute_coords {
                CoordinateSpace::Frame => (1.0, 1.0),
                CoordinateSpace::Input => {
                    let (iw, ih) = self.config.input_size;
                    (fw / iw.max(1) as f32, fh / ih.max(1) as f32)
                }
            }
        };

        let width = w * sx;
        let height = h * sy;
        let x = (cx * sx - width / 2.).clamp(0.0, fw);
        let y = (cy * sy - height / 2.).clamp(0.0, fh);
        let width = width.min(fw - x).max(1.0);
        let height = height.min(fh - y).max(1.0);

        Some(RawCandidate::new(x, y, width, height, class_id, confidence))
    }
}

/// 扫描类别分数,返回 (类别, 最大分数)
///
/// 初始分数为0,严格大于才更新;没有正分数时返回 `None`
fn max_score(clss: ArrayView1<f32>, scale: f32) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    let mut max = 0f32;
    for (id, &score) in clss.iter().enumerate() {
        let score = score * scale;
        if score > max {
            max = score;
            best = Some((id, score));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn decoder(conf: f32) -> Decoder {
        Decoder::new(DecoderConfig {
            conf_threshold: conf,
            ..Default::default()
        })
    }

    /// 构造 boxes-first 张量 [1, n, 4+nc]
    fn boxes_first(rows: &[Vec<f32>]) -> Array<f32, IxDyn> {
        let n = rows.len();
        let cols = rows[0].len();
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Array::from_shape_vec(IxDyn(&[1, n, cols]), flat).unwrap()
    }

    /// 构造 classes-first 张量 [1, 4+nc, n]
    fn classes_first(rows: &[Vec<f32>]) -> Array<f32, IxDyn> {
        let n = rows.len();
        let cols = rows[0].len();
        let mut t = Array::zeros(IxDyn(&[1, cols, n]));
        for (i, row) in rows.iter().enumerate() {
            for (c, v) in row.iter().enumerate() {
                t[[0, c, i]] = *v;
            }
        }
        t
    }

    #[test]
    fn test_classes_first_normalized() {
        // 中心 (0.5, 0.5), 尺寸 (0.1, 0.2), 类别2分数0.9
        let rows = vec![vec![0.5, 0.5, 0.1, 0.2, 0.1, 0.0, 0.9, 0.0, 0.0]];
        let out = decoder(0.25).decode(&classes_first(&rows), 1000, 500).unwrap();
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.class_id(), 2);
        assert!((c.confidence() - 0.9).abs() < 1e-6);
        assert!((c.xmin() - 450.0).abs() < 1e-3);
        assert!((c.ymin() - 200.0).abs() < 1e-3);
        assert!((c.width() - 100.0).abs() < 1e-3);
        assert!((c.height() - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_boxes_first_absolute_and_threshold() {
        let mut rows = Vec::new();
        for i in 0..120 {
            // 大于100行才会被识别为 boxes-first
            let score = if i == 7 { 0.8 } else { 0.05 };
            rows.push(vec![100.0 + i as f32, 80.0, 40.0, 20.0, score, 0.0]);
        }
        let t = boxes_first(&rows);
        assert_eq!(t.shape(), &[1, 120, 6]);
        let out = decoder(0.25).decode(&t, 640, 480).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id(), 0);
        assert!((out[0].xmin() - 87.0).abs() < 1e-3);
        assert!((out[0].ymin() - 70.0).abs() < 1e-3);
    }

    #[test]
    fn test_absolute_input_space_rescaled() {
        let d = Decoder::new(DecoderConfig {
            conf_threshold: 0.25,
            absolute_coords: CoordinateSpace::Input,
            input_size: (640, 640),
        });
        let rows = vec![vec![320.0, 320.0, 64.0, 64.0, 0.9]];
        let out = d.decode(&classes_first(&rows), 1280, 1280).unwrap();
        assert_eq!(out.len(), 1);
        assert!((out[0].xmin() - 576.0).abs() < 1e-3);
        assert!((out[0].width() - 128.0).abs() < 1e-3);
    }

    #[test]
    fn test_clamp_to_frame_with_min_size() {
        // 框超出右下角
        let rows = vec![vec![630.0, 470.0, 100.0, 100.0, 0.9]];
        let out = decoder(0.25).decode(&classes_first(&rows), 640, 480).unwrap();
        let c = &out[0];
        assert!((c.xmin() - 580.0).abs() < 1e-3);
        assert!((c.xmax() - 640.0).abs() < 1e-3);
        assert!((c.ymax() - 480.0).abs() < 1e-3);

        // 完全在画面外: 仍保留 1px
        let rows = vec![vec![900.0, 900.0, 10.0, 10.0, 0.9]];
        let out = decoder(0.25).decode(&classes_first(&rows), 640, 480).unwrap();
        assert!((out[0].width() - 1.0).abs() < 1e-6);
        assert!((out[0].height() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_zero_scores_dropped() {
        let rows = vec![vec![0.5, 0.5, 0.1, 0.1, 0.0, 0.0]];
        let out = decoder(0.0).decode(&classes_first(&rows), 640, 480).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_objectness_path() {
        let t = Array2::from_shape_vec(
            (3, 7),
            vec![
                0.5, 0.5, 0.2, 0.2, 0.9, 0.1, 0.8, // 0.72 -> 保留, 类别1
                0.5, 0.5, 0.2, 0.2, 0.1, 0.9, 0.9, // objectness 过低
                0.5, 0.5, 0.2, 0.2, 0.5, 0.4, 0.2, // 0.2 < 0.25
            ],
        )
        .unwrap()
        .into_dyn();
        let out = decoder(0.25).decode(&t, 100, 100).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].class_id(), 1);
        assert!((out[0].confidence() - 0.72).abs() < 1e-5);
    }

    #[test]
    fn test_unsupported_rank() {
        let t = Array::<f32, _>::zeros(IxDyn(&[1, 1, 5, 5]));
        assert!(matches!(
            decoder(0.25).decode(&t, 640, 480),
            Err(DecodeError::UnsupportedRank(4))
        ));
    }

    #[test]
    fn test_too_few_columns() {
        let t = Array::<f32, _>::zeros(IxDyn(&[1, 4, 10]));
        assert!(matches!(
            decoder(0.25).decode(&t, 640, 480),
            Err(DecodeError::TooFewColumns { cols: 4, .. })
        ));
    }
}
