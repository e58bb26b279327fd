// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 计数器配置 - 通过JSON文件和命令行调整参数

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::{ClassMap, CoordinateSpace, CountingMode, DecoderConfig, RefinerThresholds};
use crate::error::ConfigError;

/// 车流计数参数
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "车流检测与计数", long_about = None)]
pub struct Args {
    /// JSON配置文件
    #[arg(short, long, default_value = "traffic_counter.json")]
    pub config: PathBuf,

    /// ONNX模型路径 (覆盖配置文件)
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// 图片序列目录或单张图片
    #[arg(short, long)]
    pub source: PathBuf,

    /// 置信度阈值
    #[arg(long)]
    pub conf: Option<f32>,

    /// NMS IOU阈值
    #[arg(long)]
    pub iou: Option<f32>,

    /// 每处理1帧跳过的帧数
    #[arg(long)]
    pub skip_frames: Option<u32>,

    /// 使用CUDA
    #[arg(long, default_value_t = false)]
    pub cuda: bool,

    /// 统计结果输出文件 (JSON)
    #[arg(long)]
    pub stats_json: Option<PathBuf>,
}

/// 计数器参数配置
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterConfig {
    // === 模型参数 ===
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub use_cuda: bool,

    // === 检测参数 ===
    pub confidence_threshold: f32, // 检测置信度阈值
    pub nms_iou_threshold: f32,    // NMS IOU阈值
    pub absolute_coords: CoordinateSpace,
    pub class_map: ClassMap,

    // === 车型修正 ===
    pub enable_refinement: bool,
    pub refiner: RefinerThresholds,

    // === 计数 ===
    pub counting: CountingMode,
    pub skip_frames: u32, // 每处理1帧跳过的帧数
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/vehicles.onnx"),
            input_width: crate::INF_SIZE,
            input_height: crate::INF_SIZE,
            use_cuda: false,

            confidence_threshold: 0.15,
            nms_iou_threshold: 0.45,
            absolute_coords: CoordinateSpace::default(),
            class_map: ClassMap::default(),

            enable_refinement: true,
            refiner: RefinerThresholds::default(),

            counting: CountingMode::default(),
            skip_frames: 2,
        }
    }
}

impl CounterConfig {
    /// 从JSON文件加载配置,失败时使用默认值
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(config) => {
                info!("✅ config loaded from {}", path.display());
                config
            }
            Err(e) => {
                warn!("⚠️ {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn try_load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到JSON文件
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("confidence_threshold", self.confidence_threshold),
            ("nms_iou_threshold", self.nms_iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }
        if self.input_width == 0 || self.input_height == 0 {
            return Err(ConfigError::InvalidInputSize(self.input_width, self.input_height));
        }
        self.counting.validate()
    }

    /// 命令行参数覆盖配置文件
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(model) = &args.model {
            self.model_path = model.clone();
        }
        if let Some(conf) = args.conf {
            self.confidence_threshold = conf;
        }
        if let Some(iou) = args.iou {
            self.nms_iou_threshold = iou;
        }
        if let Some(skip) = args.skip_frames {
            self.skip_frames = skip;
        }
        if args.cuda {
            self.use_cuda = true;
        }
    }

    pub fn input_size(&self) -> (u32, u32) {
        (self.input_width, self.input_height)
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        DecoderConfig {
            conf_threshold: self.confidence_threshold,
            absolute_coords: self.absolute_coords,
            input_size: self.input_size(),
        }
    }

    /// 打印当前配置
    pub fn print_summary(&self) {
        info!("🎛️ model: {}", self.model_path.display());
        info!(
            "  input {}x{}, conf {:.2}, nms iou {:.2}, skip {} frame(s)",
            self.input_width,
            self.input_height,
            self.confidence_threshold,
            self.nms_iou_threshold,
            self.skip_frames
        );
        info!(
            "  counting: {:?}, refinement: {}",
            self.counting.method(),
            self.enable_refinement
        );
    }
}
