// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 区域/计数线几何
//! Zone containment and counting-line geometry

use crate::detection::types::Point;

/// 叉积绝对值小于该值视为点在线上
const ON_LINE_EPSILON: f64 = 1e-6;

/// 检测区域过滤器
///
/// 区域模式下丢弃中心点不在多边形内的候选框;
/// 计数线模式下全画面检测,不做过滤
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneFilter {
    FullFrame,
    Polygon(Vec<Point>),
}

impl ZoneFilter {
    /// 少于3个顶点的多边形无法构成区域,退化为全画面
    pub fn polygon(vertices: Vec<Point>) -> Self {
        if vertices.len() >= 3 {
            ZoneFilter::Polygon(vertices)
        } else {
            ZoneFilter::FullFrame
        }
    }

    pub fn contains(&self, point: &Point) -> bool {
        match self {
            ZoneFilter::FullFrame => true,
            ZoneFilter::Polygon(vertices) => point_in_polygon(point, vertices),
        }
    }
}

/// 射线法判断点是否在多边形内 (奇偶规则)
pub fn point_in_polygon(point: &Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let (px, py) = (point.x as f64, point.y as f64);
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i].x as f64, polygon[i].y as f64);
        let (xj, yj) = (polygon[j].x as f64, polygon[j].y as f64);
        // 边跨过水平射线时 yi != yj,除法安全
        if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// 点到线段的距离 (投影参数 t 限制在 [0,1])
pub fn distance_to_segment(point: &Point, start: &Point, end: &Point) -> f64 {
    let dx = end.x as f64 - start.x as f64;
    let dy = end.y as f64 - start.y as f64;
    let length_sq = dx * dx + dy * dy;
    let px = point.x as f64 - start.x as f64;
    let py = point.y as f64 - start.y as f64;

    if length_sq == 0.0 {
        return (px * px + py * py).sqrt();
    }

    let t = ((px * dx + py * dy) / length_sq).clamp(0.0, 1.0);
    let nx = t * dx;
    let ny = t * dy;
    ((px - nx).powi(2) + (py - ny).powi(2)).sqrt()
}

/// 点位于有向线段的哪一侧: -1 / 0 / +1
pub fn side_of_line(point: &Point, start: &Point, end: &Point) -> i8 {
    // 先转 f64 再相减,配置中的极端端点不会溢出
    let (dx, dy) = (end.x as f64 - start.x as f64, end.y as f64 - start.y as f64);
    let (px, py) = (point.x as f64 - start.x as f64, point.y as f64 - start.y as f64);
    let cross = dx * py - dy * px;

    if cross.abs() < ON_LINE_EPSILON {
        0
    } else if cross > 0.0 {
        1
    } else {
        -1
    }
}
