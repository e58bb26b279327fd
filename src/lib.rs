#![allow(clippy::type_complexity)]
// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置参数
pub mod detection; // 解码/跟踪/计数
pub mod error; // 错误类型
pub mod input; // 画面输入
pub mod models; // 推理后端接口与实现
pub mod pipeline; // 流水线与工作线程

pub use crate::config::{Args, CounterConfig};
pub use crate::detection::{
    ClassMap, CountingLine, CountingMethod, CountingMode, Decoder, DecoderConfig,
    DetectionResult, Point, RawCandidate, Rect, RefinerThresholds, Tracker, VehicleClass,
    ZoneFilter, INF_SIZE,
};
pub use crate::error::{ConfigError, DecodeError};
pub use crate::models::InferenceBackend;
#[cfg(feature = "ort")]
pub use crate::models::{OrtBackend, OrtConfig, OrtEP};
pub use crate::pipeline::{CountEvent, FrameOutcome, TrafficStatistics, VehiclePipeline};

/// 非极大值抑制 (类别无关)
///
/// 先丢弃置信度低于 `conf_floor` 的候选框,再按置信度降序贪心保留:
/// 与所有已保留框的 IOU 都不超过 `iou_threshold` 的框才保留
pub fn non_max_suppression(xs: &mut Vec<RawCandidate>, conf_floor: f32, iou_threshold: f32) {
    xs.retain(|x| x.confidence() >= conf_floor);
    xs.sort_by(|b1, b2| b2.confidence().total_cmp(&b1.confidence()));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
