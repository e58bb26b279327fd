// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 计数状态机
//! Counting policies: region containment or line crossing
//!
//! 计数线模式下每条轨迹的状态:
//!   未见 → 已初始化(side) → 穿越 (终态,只触发一次)

use serde::{Deserialize, Serialize};

use crate::detection::region::{distance_to_segment, side_of_line, ZoneFilter};
use crate::detection::tracker::Tracker;
use crate::detection::types::{Point, TrackId};
use crate::error::ConfigError;

/// 默认穿越距离阈值 (像素)
pub const DEFAULT_CROSSING_THRESHOLD: f64 = 50.0;
/// 距离线足够近时,即使没有观测到换边也计数 (跳帧补偿)
const NEAR_LINE_DISTANCE: f64 = 10.0;
const NEAR_LINE_MIN_FRAMES: u32 = 3;
/// 距离线太近时不更新所在侧
const DRIFT_MIN_DISTANCE: f64 = 5.0;

fn default_threshold() -> f64 {
    DEFAULT_CROSSING_THRESHOLD
}

/// 计数线 (有向线段)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CountingLine {
    pub start: Point,
    pub end: Point,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl CountingLine {
    pub fn new(start: Point, end: Point, threshold: f64) -> Self {
        Self {
            start,
            end,
            threshold,
        }
    }
}

/// 单条轨迹的计数线状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LineState {
    position: i8,
    crossed: bool,
}

impl LineState {
    /// 所在侧 (-1/0/+1), 0 表示尚未初始化
    pub fn position(&self) -> i8 {
        self.position
    }

    pub fn has_crossed(&self) -> bool {
        self.crossed
    }

    /// 推进一帧,返回本帧是否触发穿越事件
    pub fn step(&mut self, center: Point, line: &CountingLine, frames_seen: u32) -> bool {
        // 已穿越的轨迹不再检查,包括下面的近线补偿
        if self.crossed {
            return false;
        }

        let distance = distance_to_segment(&center, &line.start, &line.end);
        let side = side_of_line(&center, &line.start, &line.end);

        if self.position == 0 && side != 0 {
            self.position = side;
            return false;
        }

        let changed = side != 0 && self.position != 0 && side != self.position;
        let near = distance <= NEAR_LINE_DISTANCE && frames_seen >= NEAR_LINE_MIN_FRAMES;

        if (changed && distance <= line.threshold) || near {
            self.crossed = true;
            self.position = side;
            return true;
        }

        if side != 0 && distance > DRIFT_MIN_DISTANCE {
            self.position = side;
        }
        false
    }
}

/// 计数方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CountingMethod {
    Region,
    Line,
}

/// 计数策略 (两者互斥)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum CountingMode {
    /// 中心点在多边形内即计数; 空多边形表示全画面
    Region {
        #[serde(default)]
        polygon: Vec<Point>,
    },
    /// 穿越计数线时计数,全画面检测
    Line(CountingLine),
}

impl Default for CountingMode {
    fn default() -> Self {
        CountingMode::Region {
            polygon: Vec::new(),
        }
    }
}

impl CountingMode {
    pub fn method(&self) -> CountingMethod {
        match self {
            CountingMode::Region { .. } => CountingMethod::Region,
            CountingMode::Line(_) => CountingMethod::Line,
        }
    }

    /// 检测阶段使用的区域过滤器
    pub fn zone(&self) -> ZoneFilter {
        match self {
            CountingMode::Region { polygon } => ZoneFilter::polygon(polygon.clone()),
            CountingMode::Line(_) => ZoneFilter::FullFrame,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CountingMode::Region { polygon } => {
                if !polygon.is_empty() && polygon.len() < 3 {
                    return Err(ConfigError::PolygonTooSmall(polygon.len()));
                }
            }
            CountingMode::Line(line) => {
                if line.start == line.end {
                    return Err(ConfigError::DegenerateLine);
                }
                if line.threshold.is_nan() || line.threshold <= 0.0 {
                    return Err(ConfigError::InvalidCrossingThreshold(line.threshold));
                }
            }
        }
        Ok(())
    }

    /// 本帧该轨迹是否触发计数; 触发后由调用方 `mark_counted`
    pub fn evaluate(&self, tracker: &mut Tracker, id: TrackId) -> Option<CountingMethod> {
        if tracker.is_counted(id) {
            return None;
        }
        match self {
            // 区域过滤已经证明目标在区域内
            CountingMode::Region { .. } => Some(CountingMethod::Region),
            CountingMode::Line(line) => tracker
                .check_line_crossing(id, line.start, line.end, line.threshold)
                .then_some(CountingMethod::Line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horizontal() -> CountingLine {
        CountingLine::new(Point::new(0, 100), Point::new(640, 100), 50.0)
    }

    #[test]
    fn test_crossing_fires_once() {
        let line = horizontal();
        let mut state = LineState::default();

        assert!(!state.step(Point::new(320, 90), &line, 1));
        let initial = state.position();
        assert_ne!(initial, 0);

        assert!(state.step(Point::new(320, 110), &line, 2));
        assert!(state.has_crossed());
        assert_eq!(state.position(), -initial);

        // 再次往返也不会重复触发
        assert!(!state.step(Point::new(320, 90), &line, 3));
        assert!(!state.step(Point::new(320, 110), &line, 4));
    }

    #[test]
    fn test_side_flip_beyond_threshold_does_not_fire() {
        let line = horizontal();
        let mut state = LineState::default();
        assert!(!state.step(Point::new(320, 20), &line, 1));
        // 换边但距离 80 > 50
        assert!(!state.step(Point::new(320, 180), &line, 2));
        assert!(!state.has_crossed());
        // 作为漂移更新所在侧
        let flipped = state.position();
        assert!(!state.step(Point::new(320, 170), &line, 3));
        assert_eq!(state.position(), flipped);
    }

    #[test]
    fn test_near_line_fallback() {
        let line = horizontal();
        let mut state = LineState::default();
        assert!(!state.step(Point::new(320, 60), &line, 1));
        // 帧数不足
        assert!(!state.step(Point::new(320, 94), &line, 2));
        // 同侧, 距离 6 <= 10, 已出现3帧
        assert!(state.step(Point::new(320, 94), &line, 3));
        assert!(!state.step(Point::new(320, 95), &line, 4));
    }

    #[test]
    fn test_near_line_does_not_update_side() {
        let line = horizontal();
        let mut state = LineState::default();
        assert!(!state.step(Point::new(320, 60), &line, 1));
        let side = state.position();
        // 点在线上 (side=0): 不更新
        assert!(!state.step(Point::new(320, 100), &line, 2));
        assert_eq!(state.position(), side);
    }

    #[test]
    fn test_mode_serde() {
        let line: CountingMode = serde_json::from_str(
            r#"{"mode": "line", "start": {"x": 0, "y": 100}, "end": {"x": 640, "y": 100}}"#,
        )
        .unwrap();
        assert_eq!(line, CountingMode::Line(horizontal()));
        assert_eq!(line.method(), CountingMethod::Line);
        assert_eq!(line.zone(), ZoneFilter::FullFrame);

        let region: CountingMode = serde_json::from_str(
            r#"{"mode": "region", "polygon": [{"x": 0, "y": 0}, {"x": 10, "y": 0}, {"x": 10, "y": 10}]}"#,
        )
        .unwrap();
        assert_eq!(region.method(), CountingMethod::Region);
        assert!(matches!(region.zone(), ZoneFilter::Polygon(ref v) if v.len() == 3));
    }

    #[test]
    fn test_mode_validate() {
        assert!(CountingMode::default().validate().is_ok());
        let small = CountingMode::Region {
            polygon: vec![Point::new(0, 0), Point::new(1, 1)],
        };
        assert!(matches!(small.validate(), Err(ConfigError::PolygonTooSmall(2))));
        let degenerate =
            CountingMode::Line(CountingLine::new(Point::new(5, 5), Point::new(5, 5), 50.0));
        assert!(matches!(degenerate.validate(), Err(ConfigError::DegenerateLine)));
        let bad = CountingMode::Line(CountingLine::new(Point::new(0, 0), Point::new(5, 5), 0.0));
        assert!(matches!(bad.validate(), Err(ConfigError::InvalidCrossingThreshold(_))));
    }

    #[test]
    fn test_region_counts_first_sight_only() {
        use crate::detection::types::{Rect, VehicleClass};

        let mode = CountingMode::default();
        let mut tracker = Tracker::new();
        let r = Rect::new(10, 10, 50, 50);
        let id = tracker.match_or_create(r.center(), r, VehicleClass::Car, 0.8);

        assert_eq!(mode.evaluate(&mut tracker, id), Some(CountingMethod::Region));
        tracker.mark_counted(id);
        assert_eq!(mode.evaluate(&mut tracker, id), None);
    }

    #[test]
    fn test_empty_polygon_is_full_frame() {
        let mode = CountingMode::Region { polygon: Vec::new() };
        assert!(mode.validate().is_ok());
        assert_eq!(mode.zone(), ZoneFilter::FullFrame);
        assert!(mode.zone().contains(&Point::new(1279, 719)));
    }
}

