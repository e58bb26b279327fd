// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 车辆跟踪器
//! Two-pass nearest-match vehicle tracker
//!
//! 第一遍: 高IOU且距离近 → 同一辆车 (类别可能被重新识别)
//! 第二遍: 同类别按 IOU/距离 评分取最优,允许早期的 汽车→大巴 升级
//! 都未匹配则新建轨迹,ID 从1开始单调递增,永不复用

use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::detection::counting::{CountingLine, LineState};
use crate::detection::types::{Point, Rect, TrackId, VehicleClass};

// ========== 匹配参数 ==========

/// 最大匹配距离 (像素)
pub const MAX_DISTANCE: f64 = 200.0;
/// 第二遍匹配最小IOU
pub const MIN_IOU: f64 = 0.25;
/// 第一遍 "同一目标" IOU
pub const HIGH_IOU: f64 = 0.65;
/// 汽车→大巴 升级的最小IOU
pub const UPGRADE_IOU: f64 = 0.2;
/// 置信度提升超过该值时接受新类别
pub const CONFIDENCE_DELTA: f32 = 0.15;
/// 汽车→大巴 升级只在前几帧允许
pub const EARLY_FRAMES: u32 = 5;
/// 少于该帧数的轨迹仍在稳定类别
pub const STABILIZING_FRAMES: u32 = 3;

// ========== 清理参数 ==========

/// 超过该时间未出现 → 已离开
pub const STALE_SECS: f64 = 2.0;
/// 短命轨迹 (疑似误检) 的清理时间
pub const FALSE_POSITIVE_SECS: f64 = 0.5;
/// 少于该帧数视为短命轨迹
pub const FALSE_POSITIVE_FRAMES: u32 = 3;

/// 单个跟踪目标
#[derive(Clone, Debug)]
pub struct Track {
    id: TrackId,
    last_center: Point,
    last_bbox: Rect,
    vehicle_type: VehicleClass,
    initial_type: VehicleClass,
    frames_seen: u32,
    frames_lost: u32,
    last_seen: Instant,
    last_confidence: f32,
    type_changes: u32,
    is_counted: bool,
    /// 上次计数时使用的类别 (重新计数时用于修正统计)
    counted_as: Option<VehicleClass>,
    line: LineState,
}

impl Track {
    fn new(
        id: TrackId,
        center: Point,
        bbox: Rect,
        vehicle_type: VehicleClass,
        confidence: f32,
        now: Instant,
    ) -> Self {
        Self {
            id,
            last_center: center,
            last_bbox: bbox,
            vehicle_type,
            initial_type: vehicle_type,
            frames_seen: 1,
            frames_lost: 0,
            last_seen: now,
            last_confidence: confidence,
            type_changes: 0,
            is_counted: false,
            counted_as: None,
            line: LineState::default(),
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn last_center(&self) -> Point {
        self.last_center
    }

    pub fn last_bbox(&self) -> Rect {
        self.last_bbox
    }

    pub fn vehicle_type(&self) -> VehicleClass {
        self.vehicle_type
    }

    pub fn initial_type(&self) -> VehicleClass {
        self.initial_type
    }

    pub fn frames_seen(&self) -> u32 {
        self.frames_seen
    }

    pub fn frames_lost(&self) -> u32 {
        self.frames_lost
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub fn last_confidence(&self) -> f32 {
        self.last_confidence
    }

    pub fn type_changes(&self) -> u32 {
        self.type_changes
    }

    pub fn is_counted(&self) -> bool {
        self.is_counted
    }

    pub fn counted_as(&self) -> Option<VehicleClass> {
        self.counted_as
    }

    pub fn has_crossed_line(&self) -> bool {
        self.line.has_crossed()
    }

    pub fn line_position(&self) -> i8 {
        self.line.position()
    }

    /// 切换类别; 已计数的目标升级为大巴时重新开放计数
    fn relabel(&mut self, vehicle_type: VehicleClass) {
        info!(
            "🔄 track {} relabel {} -> {} (frames={})",
            self.id, self.vehicle_type, vehicle_type, self.frames_seen
        );
        self.vehicle_type = vehicle_type;
        self.type_changes += 1;

        if self.is_counted && vehicle_type == VehicleClass::Bus {
            self.is_counted = false;
            info!("❗ track {} reopened for counting as {}", self.id, vehicle_type);
        }
    }

    fn observe(&mut self, center: Point, bbox: Rect, confidence: f32, now: Instant) {
        self.last_center = center;
        self.last_bbox = bbox;
        self.frames_lost = 0;
        self.frames_seen += 1;
        self.last_seen = now;
        self.last_confidence = confidence;
    }

    /// 是否应该被清理
    fn is_stale(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_seen);
        elapsed > Duration::from_secs_f64(STALE_SECS)
            || (self.frames_seen < FALSE_POSITIVE_FRAMES
                && elapsed > Duration::from_secs_f64(FALSE_POSITIVE_SECS))
    }
}

/// 汽车→大巴: 进入画面后看到完整车身
fn is_bus_upgrade(from: VehicleClass, to: VehicleClass) -> bool {
    from == VehicleClass::Car && to == VehicleClass::Bus
}

/// 跟踪器 (唯一持有轨迹表)
#[derive(Debug)]
pub struct Tracker {
    tracks: BTreeMap<TrackId, Track>,
    next_id: TrackId,
    /// 当前帧已匹配的轨迹
    claimed: HashSet<TrackId>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self {
            tracks: BTreeMap::new(),
            next_id: 1,
            claimed: HashSet::new(),
        }
    }

    /// 开始新的一帧
    pub fn begin_frame(&mut self) {
        self.claimed.clear();
    }

    pub fn match_or_create(
        &mut self,
        center: Point,
        bbox: Rect,
        vehicle_type: VehicleClass,
        confidence: f32,
    ) -> TrackId {
        self.match_or_create_at(center, bbox, vehicle_type, confidence, Instant::now())
    }

    pub fn match_or_create_at(
        &mut self,
        center: Point,
        bbox: Rect,
        vehicle_type: VehicleClass,
        confidence: f32,
        now: Instant,
    ) -> TrackId {
        let id = self
            .match_same_object(center, &bbox, vehicle_type, confidence)
            .or_else(|| self.match_nearest(center, &bbox, vehicle_type));

        match id.and_then(|id| self.tracks.get_mut(&id)) {
            Some(track) => {
                track.observe(center, bbox, confidence, now);
                debug!(
                    "track {} updated: type={}, frames={}",
                    track.id, track.vehicle_type, track.frames_seen
                );
                let id = track.id;
                self.claimed.insert(id);
                id
            }
            None => self.create(center, bbox, vehicle_type, confidence, now),
        }
    }

    /// 第一遍: 同一物理目标,类别可能变化
    fn match_same_object(
        &mut self,
        center: Point,
        bbox: &Rect,
        vehicle_type: VehicleClass,
        confidence: f32,
    ) -> Option<TrackId> {
        let claimed = &self.claimed;
        let track = self.tracks.values_mut().find(|t| {
            !claimed.contains(&t.id)
                && bbox.iou(&t.last_bbox) > HIGH_IOU
                && center.distance(&t.last_center) < MAX_DISTANCE
        })?;

        if track.vehicle_type != vehicle_type {
            let should_update = (is_bus_upgrade(track.vehicle_type, vehicle_type)
                && track.frames_seen <= EARLY_FRAMES)
                || confidence > track.last_confidence + CONFIDENCE_DELTA
                || track.frames_seen < STABILIZING_FRAMES;

            if should_update {
                track.relabel(vehicle_type);
            } else {
                debug!(
                    "track {} keeps {} over reported {}",
                    track.id, track.vehicle_type, vehicle_type
                );
            }
        }
        Some(track.id)
    }

    /// 第二遍: 同类别评分匹配 (或早期 汽车→大巴 升级)
    fn match_nearest(
        &mut self,
        center: Point,
        bbox: &Rect,
        vehicle_type: VehicleClass,
    ) -> Option<TrackId> {
        let mut best: Option<(TrackId, f64)> = None;

        for track in self.tracks.values() {
            if self.claimed.contains(&track.id) {
                continue;
            }
            let distance = center.distance(&track.last_center);
            let iou = bbox.iou(&track.last_bbox);

            let distance_match = distance < MAX_DISTANCE;
            let type_match = track.vehicle_type == vehicle_type;
            let upgrade = is_bus_upgrade(track.vehicle_type, vehicle_type)
                && track.frames_seen <= EARLY_FRAMES
                && distance_match
                && iou > UPGRADE_IOU;

            if ((distance_match || iou > MIN_IOU) && type_match) || upgrade {
                let score = iou * 2.0 + (1.0 - distance / MAX_DISTANCE);
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((track.id, score));
                }
            }
        }

        let (id, score) = best?;
        if let Some(track) = self.tracks.get_mut(&id) {
            if track.vehicle_type != vehicle_type {
                track.relabel(vehicle_type);
            }
            debug!("track {} matched by score {:.2}", id, score);
        }
        Some(id)
    }

    fn create(
        &mut self,
        center: Point,
        bbox: Rect,
        vehicle_type: VehicleClass,
        confidence: f32,
        now: Instant,
    ) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks
            .insert(id, Track::new(id, center, bbox, vehicle_type, confidence, now));
        self.claimed.insert(id);
        info!(
            "{} new track {}: type={}, conf={:.2}",
            vehicle_type.emoji(),
            id,
            vehicle_type,
            confidence
        );
        id
    }

    // ========== 计数查询 ==========

    pub fn is_counted(&self, id: TrackId) -> bool {
        self.tracks.get(&id).is_some_and(|t| t.is_counted)
    }

    /// 标记已计数 (记录计数时的类别); 未知ID为空操作
    pub fn mark_counted(&mut self, id: TrackId) {
        if let Some(track) = self.tracks.get_mut(&id) {
            track.is_counted = true;
            track.counted_as = Some(track.vehicle_type);
        }
    }

    /// 上次计数使用的类别
    pub fn counted_as(&self, id: TrackId) -> Option<VehicleClass> {
        self.tracks.get(&id).and_then(|t| t.counted_as)
    }

    /// 当前 (最终) 类别; 未知ID返回 `Unknown`
    pub fn final_type(&self, id: TrackId) -> VehicleClass {
        self.tracks
            .get(&id)
            .map_or(VehicleClass::Unknown, |t| t.vehicle_type)
    }

    /// 计数线穿越检测; 每条轨迹最多返回一次 `true`
    pub fn check_line_crossing(
        &mut self,
        id: TrackId,
        start: Point,
        end: Point,
        threshold: f64,
    ) -> bool {
        let line = CountingLine::new(start, end, threshold);
        match self.tracks.get_mut(&id) {
            Some(track) => {
                let crossed = track.line.step(track.last_center, &line, track.frames_seen);
                if crossed {
                    info!(
                        "🚦 track {} crossed line: type={}, frames={}",
                        id, track.vehicle_type, track.frames_seen
                    );
                }
                crossed
            }
            None => false,
        }
    }

    // ========== 清理 ==========

    pub fn evict_stale(&mut self) -> usize {
        self.evict_stale_at(Instant::now())
    }

    /// 结束当前帧: 未匹配轨迹丢失帧数+1,清理过期轨迹,返回清理数量
    pub fn evict_stale_at(&mut self, now: Instant) -> usize {
        for track in self.tracks.values_mut() {
            if !self.claimed.contains(&track.id) {
                track.frames_lost += 1;
            }
        }
        self.claimed.clear();

        let before = self.tracks.len();
        self.tracks.retain(|id, track| {
            let stale = track.is_stale(now);
            if stale {
                debug!(
                    "track {} evicted: frames_seen={}, frames_lost={}",
                    id, track.frames_seen, track.frames_lost
                );
            }
            !stale
        });
        before - self.tracks.len()
    }

    // ========== 访问器 ==========

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// 下一个将分配的ID
    pub fn next_id(&self) -> TrackId {
        self.next_id
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }
}
