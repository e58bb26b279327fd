// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 推理后端统一接口
///
/// # 架构说明
///
/// 检测流水线只依赖 [`InferenceBackend`],具体推理引擎在启动时选定:
/// - **OrtBackend**: ONNX Runtime (`ort` feature), 可选 CUDA
/// - 测试中可以用返回固定张量的假后端替代
///
/// ## 核心流程
/// ```text
/// 原始画面 → preprocess → NCHW张量 (拉伸到输入尺寸, RGB, /255)
///          ↓
///     推理引擎 run
///          ↓
///     原始输出张量 → detection::Decoder
/// ```
use anyhow::{ensure, Context, Result};
use fast_image_resize as fr;
use image::DynamicImage;
use ndarray::{Array, IxDyn};
use tracing::info;

#[cfg(feature = "ort")]
pub mod ort_backend;

#[cfg(feature = "ort")]
pub use ort_backend::{OrtBackend, OrtConfig, OrtEP};

/// 推理后端
pub trait InferenceBackend: Send {
    /// 网络输入分辨率 (width, height)
    fn input_size(&self) -> (u32, u32);

    /// 预处理: 画面 → `[1, 3, H, W]` 张量
    fn preprocess(&mut self, frame: &DynamicImage) -> Result<Array<f32, IxDyn>> {
        preprocess_frame(frame, self.input_size())
    }

    /// 推理: 返回模型全部原始输出
    fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>>;

    /// preprocess → run
    fn forward(&mut self, frame: &DynamicImage) -> Result<Vec<Array<f32, IxDyn>>> {
        let xs = self.preprocess(frame)?;
        self.run(xs)
    }

    /// 打印后端信息
    fn summary(&self) {
        let (w, h) = self.input_size();
        info!("inference backend: input {}x{}", w, h);
    }
}

/// 拉伸缩放到输入尺寸 (不保持宽高比),转为 NCHW 浮点张量
///
/// 解码器按画面宽高还原归一化坐标,因此这里不做 letterbox
pub fn preprocess_frame(frame: &DynamicImage, input_size: (u32, u32)) -> Result<Array<f32, IxDyn>> {
    let (width, height) = input_size;
    ensure!(width > 0 && height > 0, "invalid input size {}x{}", width, height);
    ensure!(
        frame.width() > 0 && frame.height() > 0,
        "empty frame {}x{}",
        frame.width(),
        frame.height()
    );

    let rgb = frame.to_rgb8();
    let src = fr::images::ImageRef::new(
        rgb.width(),
        rgb.height(),
        rgb.as_raw(),
        fr::PixelType::U8x3,
    )
    .context("failed to wrap frame for resizing")?;
    let mut dst = fr::images::Image::new(width, height, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    resizer
        .resize(&src, &mut dst, Some(&options))
        .context("failed to resize frame to model input")?;

    let raw = dst.buffer();
    let plane = (width * height) as usize;
    let mut data = vec![0f32; 3 * plane];
    for (idx, px) in raw.chunks_exact(3).enumerate() {
        data[idx] = px[0] as f32 / 255.0;
        data[plane + idx] = px[1] as f32 / 255.0;
        data[2 * plane + idx] = px[2] as f32 / 255.0;
    }

    let ys = Array::from_shape_vec(IxDyn(&[1, 3, height as usize, width as usize]), data)
        .context("failed to build input tensor")?;
    Ok(ys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn test_preprocess_shape_and_range() {
        let img = RgbImage::from_pixel(320, 240, Rgb([255, 0, 51]));
        let xs = preprocess_frame(&DynamicImage::ImageRgb8(img), (64, 32)).unwrap();
        assert_eq!(xs.shape(), &[1, 3, 32, 64]);
        // 允许缩放时1个灰度级的舍入误差
        assert!((xs[[0, 0, 10, 10]] - 1.0).abs() < 0.01);
        assert!(xs[[0, 1, 10, 10]].abs() < 0.01);
        assert!((xs[[0, 2, 10, 10]] - 0.2).abs() < 0.01);
    }

    #[test]
    fn test_preprocess_rejects_empty() {
        let img = RgbImage::new(0, 0);
        assert!(preprocess_frame(&DynamicImage::ImageRgb8(img), (64, 64)).is_err());
        let img = RgbImage::new(8, 8);
        assert!(preprocess_frame(&DynamicImage::ImageRgb8(img), (0, 64)).is_err());
    }

    struct Fixed;

    impl InferenceBackend for Fixed {
        fn input_size(&self) -> (u32, u32) {
            (16, 16)
        }

        fn run(&mut self, input: Array<f32, IxDyn>) -> Result<Vec<Array<f32, IxDyn>>> {
            Ok(vec![input])
        }
    }

    #[test]
    fn test_forward_uses_default_preprocess() {
        let mut backend = Fixed;
        let img = DynamicImage::ImageRgb8(RgbImage::new(40, 20));
        let ys = backend.forward(&img).unwrap();
        assert_eq!(ys.len(), 1);
        assert_eq!(ys[0].shape(), &[1, 3, 16, 16]);
    }
}
