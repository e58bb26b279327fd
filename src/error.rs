// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use thiserror::Error;

/// 张量解码错误 (单帧可恢复)
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported output tensor rank {0}, expected 2 or 3")]
    UnsupportedRank(usize),

    #[error("output tensor has {cols} values per box, need at least {min}")]
    TooFewColumns { cols: usize, min: usize },

    #[error("empty output tensor with shape {0:?}")]
    Empty(Vec<usize>),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f32 },

    #[error("detection zone needs at least 3 vertices, got {0}")]
    PolygonTooSmall(usize),

    #[error("counting line has zero length")]
    DegenerateLine,

    #[error("crossing threshold must be positive, got {0}")]
    InvalidCrossingThreshold(f64),

    #[error("input resolution must be non-zero, got {0}x{1}")]
    InvalidInputSize(u32, u32),
}
