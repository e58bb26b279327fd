// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 计数统计 (工作线程写入,其他线程经同一把锁读取)

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Local};
use serde::Serialize;

use super::CountEvent;
use crate::detection::{DetectionResult, TrackId, VehicleClass};

#[derive(Debug, Clone, Serialize)]
pub struct TrafficStatistics {
    pub vehicle_counts: BTreeMap<VehicleClass, u64>,
    /// 已计数的不同轨迹数
    pub total_vehicles: u64,
    pub processed_frames: u64,
    /// 处理耗时 (秒)
    pub processing_time: f64,
    pub average_fps: f64,
    pub current_fps: f64,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub detailed_results: Vec<DetectionResult>,
    #[serde(skip)]
    counted_ids: HashSet<TrackId>,
}

impl Default for TrafficStatistics {
    fn default() -> Self {
        Self::new(Local::now())
    }
}

impl TrafficStatistics {
    pub fn new(start_time: DateTime<Local>) -> Self {
        Self {
            vehicle_counts: BTreeMap::new(),
            total_vehicles: 0,
            processed_frames: 0,
            processing_time: 0.0,
            average_fps: 0.0,
            current_fps: 0.0,
            start_time,
            end_time: None,
            detailed_results: Vec::new(),
            counted_ids: HashSet::new(),
        }
    }

    /// 记录计数事件; 重新计数时把旧类别的计数移到新类别
    pub fn record(&mut self, event: &CountEvent) {
        let id = event.detection.tracker_id;
        let vehicle_type = event.detection.vehicle_type;

        if let Some(previous) = event.previous_type {
            if let Some(n) = self.vehicle_counts.get_mut(&previous) {
                *n = n.saturating_sub(1);
            }
        }
        *self.vehicle_counts.entry(vehicle_type).or_insert(0) += 1;

        self.counted_ids.insert(id);
        self.total_vehicles = self.counted_ids.len() as u64;
        self.detailed_results.push(event.detection.clone());
    }

    pub fn count(&self, vehicle_type: VehicleClass) -> u64 {
        self.vehicle_counts.get(&vehicle_type).copied().unwrap_or(0)
    }

    /// 结束统计: 记录结束时间和平均FPS
    pub fn finish(&mut self, end_time: DateTime<Local>, elapsed_secs: f64) {
        self.end_time = Some(end_time);
        self.processing_time = elapsed_secs;
        self.average_fps = if elapsed_secs > 0.0 {
            self.processed_frames as f64 / elapsed_secs
        } else {
            0.0
        };
    }
}
