// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// 单帧处理链路:
/// - Decoder:   输出张量 → 候选框
/// - Region:    区域过滤 / 计数线几何
/// - Refiner:   按尺寸修正车型
/// - Tracker:   跨帧身份关联
/// - Counting:  区域首见计数 / 计数线穿越计数
pub mod counting;
pub mod decoder;
pub mod refiner;
pub mod region;
pub mod tracker;
pub mod types;

pub use counting::{CountingLine, CountingMethod, CountingMode, LineState};
pub use decoder::{CoordinateSpace, Decoder, DecoderConfig};
pub use refiner::{refine, ClassMap, RefinerThresholds};
pub use region::{distance_to_segment, point_in_polygon, side_of_line, ZoneFilter};
pub use tracker::{Track, Tracker};
pub use types::{DetectionResult, Point, RawCandidate, Rect, TrackId, VehicleClass, INF_SIZE};
