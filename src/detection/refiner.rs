// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 车型修正器 + 类别映射
//! Geometry based vehicle type refinement and class-id mapping
//!
//! 规则按顺序执行,后面的规则可以覆盖前面的结果,
//! 所有规则都只看检测器给出的原始类别

use std::collections::BTreeMap;

use phf::phf_map;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detection::types::{Rect, VehicleClass};

// ========== 置信度门限 ==========

/// 低于该置信度的小而窄目标判为自行车
const BICYCLE_MAX_CONFIDENCE: f32 = 0.7;
/// 高置信度: 只在尺寸严重不符时才改判
const HIGH_CONFIDENCE: f32 = 0.75;
/// 极高置信度: 直接信任检测器
const VERY_HIGH_CONFIDENCE: f32 = 0.85;

/// 尺寸/宽高比阈值 (像素², 宽/高)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerThresholds {
    pub bicycle_max_area: i64,
    pub motorcycle_min_area: i64,
    pub motorcycle_max_area: i64,
    pub car_min_area: i64,
    pub car_max_area: i64,
    pub bus_min_area: i64,

    pub bicycle_min_aspect: f64,
    pub bicycle_max_aspect: f64,
    pub motorcycle_min_aspect: f64,
    pub motorcycle_max_aspect: f64,
    pub car_min_aspect: f64,
    pub car_max_aspect: f64,
    pub bus_min_aspect: f64,
}

impl Default for RefinerThresholds {
    fn default() -> Self {
        // 3-5m 距离的城市道路摄像头
        Self {
            bicycle_max_area: 2000,
            motorcycle_min_area: 1200,
            motorcycle_max_area: 10000,
            car_min_area: 9000,
            car_max_area: 25000,
            bus_min_area: 18000,

            bicycle_min_aspect: 0.1,
            bicycle_max_aspect: 0.5,
            motorcycle_min_aspect: 0.2,
            motorcycle_max_aspect: 1.2,
            car_min_aspect: 0.4,
            car_max_aspect: 2.5,
            bus_min_aspect: 1.5,
        }
    }
}

/// 根据面积、宽高比和置信度修正车型
pub fn refine(
    detected: VehicleClass,
    bbox: &Rect,
    confidence: f32,
    t: &RefinerThresholds,
) -> VehicleClass {
    let area = bbox.area();
    let aspect = bbox.aspect_ratio();

    let mut refined = detected;
    let mut reason = "unchanged";

    // 两轮车看到全貌后放大 → 汽车/大巴
    if detected.is_two_wheeler() {
        if area > t.bus_min_area && aspect > t.bus_min_aspect {
            refined = VehicleClass::Bus;
            reason = "large_size_wide_aspect";
        } else if area > t.car_min_area && aspect > t.car_min_aspect {
            refined = VehicleClass::Car;
            reason = "car_size_range";
        }
    }

    if detected == VehicleClass::Car {
        if area < t.motorcycle_max_area && aspect < t.car_max_aspect {
            if area < t.bicycle_max_area && aspect < t.bicycle_max_aspect {
                refined = VehicleClass::Bicycle;
                reason = "too_small_for_car_bicycle";
            } else {
                refined = VehicleClass::Motorcycle;
                reason = "too_small_for_car_motorcycle";
            }
        } else if area > t.bus_min_area && aspect > t.bus_min_aspect {
            refined = VehicleClass::Bus;
            reason = "too_large_for_car";
        }
    }

    if detected == VehicleClass::Bus && area < t.car_max_area {
        if area > t.car_min_area && aspect > t.car_min_aspect {
            refined = VehicleClass::Car;
            reason = "too_small_for_bus";
        } else if area < t.motorcycle_max_area {
            refined = VehicleClass::Motorcycle;
            reason = "bus_actually_motorcycle";
        }
    }

    // 自行车 vs 摩托车
    if detected.is_two_wheeler() {
        if area < t.bicycle_max_area
            && aspect >= t.bicycle_min_aspect
            && aspect < t.bicycle_max_aspect
            && confidence < BICYCLE_MAX_CONFIDENCE
        {
            refined = VehicleClass::Bicycle;
            reason = "small_narrow_bicycle";
        } else if (t.motorcycle_min_area..=t.motorcycle_max_area).contains(&area)
            && aspect >= t.motorcycle_min_aspect
            && aspect <= t.motorcycle_max_aspect
        {
            refined = VehicleClass::Motorcycle;
            reason = "medium_size_motorcycle";
        }
    }

    if confidence > HIGH_CONFIDENCE {
        if detected == VehicleClass::Car && area < t.motorcycle_min_area {
            refined = VehicleClass::Bicycle;
            reason = "high_conf_but_tiny";
        } else if detected == VehicleClass::Bicycle && area > t.car_min_area {
            refined = VehicleClass::Car;
            reason = "high_conf_but_huge";
        } else if confidence > VERY_HIGH_CONFIDENCE {
            refined = detected;
            reason = "very_high_confidence";
        }
    }

    if refined != detected {
        debug!(
            "🔄 refine {} -> {} ({}, area={}, ratio={:.2}, conf={:.2})",
            detected, refined, reason, area, aspect, confidence
        );
    }
    refined
}

// ========== 类别映射 ==========

/// 模型标签 → 车型 (含常见同义词)
static LABEL_CLASSES: phf::Map<&'static str, VehicleClass> = phf_map! {
    "bicycle" => VehicleClass::Bicycle,
    "bike" => VehicleClass::Bicycle,
    "motorcycle" => VehicleClass::Motorcycle,
    "motorbike" => VehicleClass::Motorcycle,
    "car" => VehicleClass::Car,
    "automobile" => VehicleClass::Car,
    "bus" => VehicleClass::Bus,
    "coach" => VehicleClass::Bus,
};

/// 类别ID → 车型映射表,表中没有的ID一律视为 `Unknown`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassMap(BTreeMap<usize, VehicleClass>);

impl Default for ClassMap {
    /// 自训练模型: 0 自行车, 1 大巴, 2 汽车, 3 车牌, 4 摩托车
    fn default() -> Self {
        Self(BTreeMap::from([
            (0, VehicleClass::Bicycle),
            (1, VehicleClass::Bus),
            (2, VehicleClass::Car),
            (3, VehicleClass::Unknown),
            (4, VehicleClass::Motorcycle),
        ]))
    }
}

impl ClassMap {
    pub fn new(table: BTreeMap<usize, VehicleClass>) -> Self {
        Self(table)
    }

    /// 由模型标签列表生成映射 (大小写不敏感)
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let table = labels
            .iter()
            .enumerate()
            .map(|(id, label)| {
                let key = label.as_ref().trim().to_lowercase();
                let class = LABEL_CLASSES
                    .get(key.as_str())
                    .copied()
                    .unwrap_or(VehicleClass::Unknown);
                (id, class)
            })
            .collect();
        Self(table)
    }

    pub fn map(&self, class_id: usize) -> VehicleClass {
        self.0
            .get(&class_id)
            .copied()
            .unwrap_or(VehicleClass::Unknown)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
