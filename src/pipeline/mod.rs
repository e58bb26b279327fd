// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 车流处理流水线 (Vehicle Pipeline)
///
/// 单帧处理顺序:
/// 输出张量 → Decoder → NMS → 区域过滤 → 车型修正 → Tracker → 计数
///
/// - `VehiclePipeline`: 单帧同步处理,独占跟踪表
/// - `Worker`:          工作线程循环 (跳帧/暂停/停止/统计)
/// - `TrafficStatistics`: 聚合统计,经 `Arc<Mutex<_>>` 共享
pub mod stats;
pub mod worker;

use std::time::Instant;

use chrono::Local;
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::CounterConfig;
use crate::detection::{
    refine, ClassMap, CountingMethod, CountingMode, Decoder, DetectionResult, RawCandidate, Rect,
    RefinerThresholds, Tracker, VehicleClass, ZoneFilter,
};
use crate::error::{ConfigError, DecodeError};
use crate::models::InferenceBackend;
use crate::non_max_suppression;

pub use stats::TrafficStatistics;
pub use worker::{Worker, WorkerControl};

// ========== 流水线输出 ==========

/// 计数事件
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CountEvent {
    /// 计数时的检测结果 (类别为轨迹的最终类别)
    pub detection: DetectionResult,
    pub method: CountingMethod,
    /// 汽车→大巴 升级后重新计数时,之前计入的类别
    pub previous_type: Option<VehicleClass>,
}

/// 单帧处理结果
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameOutcome {
    pub detections: Vec<DetectionResult>,
    pub events: Vec<CountEvent>,
}

// ========== 流水线 ==========

pub struct VehiclePipeline {
    decoder: Decoder,
    nms_iou_threshold: f32,
    class_map: ClassMap,
    refiner: Option<RefinerThresholds>,
    counting: CountingMode,
    zone: ZoneFilter,
    tracker: Tracker,
}

impl VehiclePipeline {
    pub fn new(config: &CounterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            decoder: Decoder::new(config.decoder_config()),
            nms_iou_threshold: config.nms_iou_threshold,
            class_map: config.class_map.clone(),
            refiner: config.enable_refinement.then(|| config.refiner.clone()),
            zone: config.counting.zone(),
            counting: config.counting.clone(),
            tracker: Tracker::new(),
        })
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn counting(&self) -> &CountingMode {
        &self.counting
    }

    /// 新会话: 清空跟踪表,ID 重新从1开始
    pub fn reset(&mut self) {
        self.tracker = Tracker::new();
    }

    /// 解码 + NMS
    pub fn detect(
        &self,
        output: &Array<f32, IxDyn>,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<Vec<RawCandidate>, DecodeError> {
        let mut candidates = self.decoder.decode(output, frame_width, frame_height)?;
        non_max_suppression(
            &mut candidates,
            self.decoder.config().conf_threshold,
            self.nms_iou_threshold,
        );
        Ok(candidates)
    }

    /// 推理 + 处理一帧; 推理失败按无检测处理
    pub fn process_frame<B: InferenceBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        frame: &DynamicImage,
    ) -> FrameOutcome {
        let (width, height) = (frame.width(), frame.height());
        match backend.forward(frame) {
            Ok(ys) => {
                if ys.is_empty() {
                    warn!("inference returned no outputs");
                }
                self.process_outputs_at(&ys, width, height, Instant::now())
            }
            Err(e) => {
                warn!("inference failed: {:#}", e);
                self.process_candidates(Vec::new(), width, height, Instant::now())
            }
        }
    }

    /// 解码全部输出层并合并,统一做一次 NMS; 单个输出解码失败时跳过该输出
    pub fn detect_all(
        &self,
        outputs: &[Array<f32, IxDyn>],
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<RawCandidate> {
        let mut candidates = Vec::new();
        for (i, output) in outputs.iter().enumerate() {
            match self.decoder.decode(output, frame_width, frame_height) {
                Ok(xs) => candidates.extend(xs),
                Err(e) => warn!("output {} skipped: {}", i, e),
            }
        }
        non_max_suppression(
            &mut candidates,
            self.decoder.config().conf_threshold,
            self.nms_iou_threshold,
        );
        candidates
    }

    /// 处理一帧的全部输出张量
    pub fn process_outputs_at(
        &mut self,
        outputs: &[Array<f32, IxDyn>],
        frame_width: u32,
        frame_height: u32,
        now: Instant,
    ) -> FrameOutcome {
        let candidates = self.detect_all(outputs, frame_width, frame_height);
        self.process_candidates(candidates, frame_width, frame_height, now)
    }

    pub fn process_tensor(
        &mut self,
        output: &Array<f32, IxDyn>,
        frame_width: u32,
        frame_height: u32,
    ) -> FrameOutcome {
        self.process_tensor_at(output, frame_width, frame_height, Instant::now())
    }

    /// 处理一帧输出张量; 解码失败记录警告并按无检测处理
    pub fn process_tensor_at(
        &mut self,
        output: &Array<f32, IxDyn>,
        frame_width: u32,
        frame_height: u32,
        now: Instant,
    ) -> FrameOutcome {
        let candidates = match self.detect(output, frame_width, frame_height) {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("frame skipped: {}", e);
                Vec::new()
            }
        };
        self.process_candidates(candidates, frame_width, frame_height, now)
    }

    /// NMS 之后的处理: 过滤 → 修正 → 跟踪 → 计数 → 清理
    pub fn process_candidates(
        &mut self,
        candidates: Vec<RawCandidate>,
        frame_width: u32,
        frame_height: u32,
        now: Instant,
    ) -> FrameOutcome {
        let mut outcome = FrameOutcome::default();
        self.tracker.begin_frame();

        for candidate in &candidates {
            let Some(bbox) = Rect::from_candidate(candidate, frame_width, frame_height) else {
                continue;
            };
            let center = bbox.center();
            if !self.zone.contains(&center) {
                continue;
            }

            let detected = self.class_map.map(candidate.class_id());
            if !detected.is_vehicle() {
                debug!("class {} is not a vehicle, dropped", candidate.class_id());
                continue;
            }
            let vehicle_type = match &self.refiner {
                Some(thresholds) => refine(detected, &bbox, candidate.confidence(), thresholds),
                None => detected,
            };

            let id = self
                .tracker
                .match_or_create_at(center, bbox, vehicle_type, candidate.confidence(), now);
            // 逐帧结果使用本帧修正后的类别
            let detection = DetectionResult {
                tracker_id: id,
                vehicle_type,
                confidence: candidate.confidence(),
                bounding_box: bbox,
                center,
                timestamp: Local::now(),
            };

            if let Some(method) = self.counting.evaluate(&mut self.tracker, id) {
                let previous_type = self.tracker.counted_as(id);
                self.tracker.mark_counted(id);
                // 计数使用轨迹的最终类别
                let final_type = self.tracker.final_type(id);
                if previous_type != Some(final_type) {
                    info!(
                        "{} counted track {} as {} ({:?})",
                        final_type.emoji(),
                        id,
                        final_type,
                        method
                    );
                    outcome.events.push(CountEvent {
                        detection: DetectionResult {
                            vehicle_type: final_type,
                            ..detection.clone()
                        },
                        method,
                        previous_type,
                    });
                }
            }
            outcome.detections.push(detection);
        }

        self.tracker.evict_stale_at(now);
        outcome
    }
}
