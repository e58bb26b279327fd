// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 画面输入 (Frame Input)
///
/// 工作线程逐帧拉取画面:
/// - FrameSource:   画面源接口, `Ok(None)` 表示结束
/// - ImageSequence: 目录中按文件名排序的图片序列 (或单张图片)
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use tracing::info;

/// 支持的图片扩展名
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

pub trait FrameSource {
    /// 下一帧; 结束时返回 `Ok(None)`
    fn next_frame(&mut self) -> Result<Option<DynamicImage>>;

    /// 总帧数 (未知时为 `None`)
    fn frame_count(&self) -> Option<usize> {
        None
    }
}

/// 内存中的画面队列
impl FrameSource for VecDeque<DynamicImage> {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        Ok(self.pop_front())
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// 图片序列
#[derive(Debug, Clone)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    cursor: usize,
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

impl ImageSequence {
    /// 打开目录 (按文件名排序) 或单张图片
    pub fn open<P: AsRef<Path>>(source: P) -> Result<Self> {
        let source = source.as_ref();
        let paths = if source.is_dir() {
            let mut paths = Vec::new();
            for entry in fs::read_dir(source)
                .with_context(|| format!("failed to read directory {}", source.display()))?
            {
                let path = entry?.path();
                if path.is_file() && is_image(&path) {
                    paths.push(path);
                }
            }
            paths.sort();
            paths
        } else if source.is_file() {
            vec![source.to_path_buf()]
        } else {
            bail!("source {} does not exist", source.display());
        };

        if paths.is_empty() {
            bail!("no images found in {}", source.display());
        }
        info!("📹 {} frame(s) from {}", paths.len(), source.display());
        Ok(Self { paths, cursor: 0 })
    }

    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self { paths, cursor: 0 }
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<DynamicImage>> {
        let Some(path) = self.paths.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        let img = image::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Some(img))
    }

    fn frame_count(&self) -> Option<usize> {
        Some(self.paths.len())
    }
}
