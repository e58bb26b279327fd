// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNX Runtime 推理后端

use std::path::PathBuf;

use anyhow::{Context, Result};
use ndarray::{Array, IxDyn};
use ort::execution_providers::CUDAExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, info};

use super::InferenceBackend;

/// 执行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrtEP {
    #[default]
    Cpu,
    /// CUDA 设备号
    Cuda(i32),
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub model_path: PathBuf,
    /// 网络输入分辨率 (width, height)
    pub input_size: (u32, u32),
    pub ep: OrtEP,
    pub intra_threads: usize,
}

pub struct OrtBackend {
    session: Session,
    input_name: String,
    output_names: Vec<String>,
    input_size: (u32, u32),
    ep: OrtEP,
}

impl OrtBackend {
    /// 加载模型; 失败时流水线无法启动
    pub fn new(config: &OrtConfig) -> Result<Self> {
        info!("loading model {}", config.model_path.display());

        let mut builder = Session::builder().context("failed to create ORT session builder")?;
        if let OrtEP::Cuda(device_id) = config.ep {
            info!("enabling CUDA execution provider (device {})", device_id);
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build()])
                .context("failed to register CUDA execution provider")?;
        }

        let session = builder
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set graph optimization level")?
            .with_intra_threads(config.intra_threads.max(1))
            .context("failed to set intra-op threads")?
            .commit_from_file(&config.model_path)
            .with_context(|| format!("failed to load model {}", config.model_path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("model has no inputs")?;
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.is_empty() {
            anyhow::bail!("model has no outputs");
        }

        Ok(Self {
            session,
            input_name,
            output_names,
            input_size: config.input_size,
            ep: config.ep,
        })
    }

    pub fn ep(&self) -> OrtEP {
        self.ep
    }
}

impl InferenceBackend for OrtBackend {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
        let tensor = Tensor::from_array(input).context("failed to create input tensor")?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .context("inference failed")?;

        let mut ys = Vec::with_capacity(self.output_names.len());
        for name in &self.output_names {
            let (dims, data) = outputs[name.as_str()]
                .try_extract_tensor::<f32>()
                .with_context(|| format!("failed to extract output {}", name))?;
            let dims: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();
            debug!("output {} shape {:?}", name, dims);
            let y = Array::from_shape_vec(IxDyn(&dims), data.to_vec())
                .with_context(|| format!("output {} has inconsistent shape", name))?;
            ys.push(y);
        }
        Ok(ys)
    }

    fn summary(&self) {
        let (w, h) = self.input_size;
        info!(
            "ONNX Runtime backend: input '{}' {}x{}, outputs {:?}, device {:?}",
            self.input_name, w, h, self.output_names, self.ep
        );
        if self.output_names.len() > 1 {
            debug!("{} outputs are decoded and merged", self.output_names.len());
        }
    }
}
