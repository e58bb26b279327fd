// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 车流计数系统数据结构定义
/// Data structures for the vehicle counting pipeline
use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

// ========== 公共常量 ==========

/// 推理输入尺寸 (YOLOv8 默认 640x640)
pub const INF_SIZE: u32 = 640;

/// 跟踪ID (从1开始单调递增,永不复用)
pub type TrackId = u32;

// ========== 枚举类型 ==========

/// 车辆类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Bicycle,
    Motorcycle,
    Car,
    Bus,
    /// 非车辆类别 (如车牌),进入跟踪前被过滤
    Unknown,
}

impl VehicleClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Bicycle => "bicycle",
            VehicleClass::Motorcycle => "motorcycle",
            VehicleClass::Car => "car",
            VehicleClass::Bus => "bus",
            VehicleClass::Unknown => "unknown",
        }
    }

    pub fn is_vehicle(&self) -> bool {
        !matches!(self, VehicleClass::Unknown)
    }

    /// 两轮车 (自行车/摩托车)
    pub fn is_two_wheeler(&self) -> bool {
        matches!(self, VehicleClass::Bicycle | VehicleClass::Motorcycle)
    }

    /// 日志用图标
    pub fn emoji(&self) -> &'static str {
        match self {
            VehicleClass::Bicycle => "🚲",
            VehicleClass::Motorcycle => "🏍️",
            VehicleClass::Car => "🚗",
            VehicleClass::Bus => "🚌",
            VehicleClass::Unknown => "❔",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ========== 数据结构 ==========

/// 原始候选框 (解码器 → 抑制器,单帧内有效)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawCandidate {
    // a bounding box in frame pixels, corner form
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
    class_id: usize,
    confidence: f32,
}

impl RawCandidate {
    pub fn new(
        xmin: f32,
        ymin: f32,
        width: f32,
        height: f32,
        class_id: usize,
        confidence: f32,
    ) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
            class_id,
            confidence,
        }
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn class_id(&self) -> usize {
        self.class_id
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, another: &RawCandidate) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &RawCandidate) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &RawCandidate) -> f32 {
        let union = self.union(another);
        if union <= 0.0 {
            return 0.0;
        }
        (self.intersection_area(another) / union).clamp(0.0, 1.0)
    }
}

/// 整数像素坐标点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// 欧氏距离
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// 整数边界框 (x, y, width, height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 候选框 → 整数框 (截断取整并限制在画面内)
    ///
    /// 宽或高不足1像素的退化框返回 `None`
    pub fn from_candidate(
        candidate: &RawCandidate,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        let values = [
            candidate.xmin(),
            candidate.ymin(),
            candidate.width(),
            candidate.height(),
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let fw = frame_width as i32;
        let fh = frame_height as i32;
        let x = (candidate.xmin() as i32).clamp(0, (fw - 1).max(0));
        let y = (candidate.ymin() as i32).clamp(0, (fh - 1).max(0));
        let width = (candidate.width() as i32).min(fw - x);
        let height = (candidate.height() as i32).min(fh - y);

        if width < 1 || height < 1 {
            return None;
        }
        Some(Self::new(x, y, width, height))
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// 宽高比 (width / height)
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// 计算两个边界框的IOU (Intersection over Union)
    pub fn iou(&self, other: &Rect) -> f64 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        let intersection = ((x2 - x1).max(0) as i64 * (y2 - y1).max(0) as i64) as f64;
        let union = (self.area() + other.area()) as f64 - intersection;

        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }
}

/// 检测结果 (流水线输出单元,每帧每个匹配/新建的轨迹一条)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub tracker_id: TrackId,
    pub vehicle_type: VehicleClass,
    pub confidence: f32,
    pub bounding_box: Rect,
    pub center: Point,
    pub timestamp: DateTime<Local>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_iou_identity_and_symmetry() {
        let a = Rect::new(10, 10, 50, 40);
        let b = Rect::new(30, 20, 50, 40);
        assert!((a.iou(&a) - 1.0).abs() < 1e-9);
        assert!((a.iou(&b) - b.iou(&a)).abs() < 1e-12);
        let v = a.iou(&b);
        assert!((0.0..=1.0).contains(&v));
    }

    #[test]
    fn test_rect_iou_disjoint_and_touching() {
        let a = Rect::new(0, 0, 10, 10);
        assert_eq!(a.iou(&Rect::new(100, 100, 10, 10)), 0.0);
        // 相邻不重叠
        assert_eq!(a.iou(&Rect::new(10, 0, 10, 10)), 0.0);
    }

    #[test]
    fn test_candidate_iou() {
        let a = RawCandidate::new(0.0, 0.0, 10.0, 10.0, 0, 0.9);
        let b = RawCandidate::new(5.0, 0.0, 10.0, 10.0, 0, 0.8);
        // 交集 50, 并集 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        let far = RawCandidate::new(50.0, 50.0, 10.0, 10.0, 0, 0.8);
        assert_eq!(a.iou(&far), 0.0);
    }

    #[test]
    fn test_rect_from_candidate_clamps() {
        let c = RawCandidate::new(-5.7, 10.2, 30.9, 2000.0, 2, 0.5);
        let r = Rect::from_candidate(&c, 640, 480).unwrap();
        assert_eq!(r, Rect::new(0, 10, 30, 470));
        assert_eq!(r.center(), Point::new(15, 245));
    }

    #[test]
    fn test_rect_from_candidate_degenerate() {
        let thin = RawCandidate::new(10.0, 10.0, 0.5, 20.0, 0, 0.5);
        assert!(Rect::from_candidate(&thin, 640, 480).is_none());
        let nan = RawCandidate::new(f32::NAN, 10.0, 5.0, 5.0, 0, 0.5);
        assert!(Rect::from_candidate(&nan, 640, 480).is_none());
    }

    #[test]
    fn test_vehicle_class_serde() {
        let json = serde_json::to_string(&VehicleClass::Motorcycle).unwrap();
        assert_eq!(json, "\"motorcycle\"");
        let back: VehicleClass = serde_json::from_str("\"bus\"").unwrap();
        assert_eq!(back, VehicleClass::Bus);
    }
}
