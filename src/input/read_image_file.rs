// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/read_image_file.rs - 图像文件读取与预处理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use half::f16;
use image::{ImageReader, RgbImage, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::{F16NchwTensor, ImageSize, PreparedFrame, RGB_CHANNELS};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 已解码的 RGB 图像
pub struct ImageFileInput {
  source: PathBuf,
  image: RgbImage,
}

impl ImageFileInput {
  /// 打开并解码图像文件，解码失败立即返回错误
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    debug!(
      "图像 {} 解码完成: {}x{}",
      path.display(),
      image.width(),
      image.height()
    );

    Ok(ImageFileInput {
      source: path.to_path_buf(),
      image: image.into_rgb8(),
    })
  }

  pub fn from_image(source: impl Into<PathBuf>, image: RgbImage) -> Self {
    ImageFileInput {
      source: source.into(),
      image,
    }
  }

  pub fn size(&self) -> ImageSize {
    let (width, height) = self.image.dimensions();
    ImageSize { width, height }
  }

  /// 生成模型输入，同时保留原图尺寸
  pub fn prepare(&self) -> PreparedFrame {
    PreparedFrame {
      tensor: F16NchwTensor::from(&self.image),
      original: self.size(),
      source: self.source.clone(),
    }
  }
}

impl<const W: u32, const H: u32> From<&RgbImage> for F16NchwTensor<W, H> {
  fn from(image: &RgbImage) -> Self {
    // 双线性缩放到模型输入尺寸，不保持长宽比
    let resized = image::imageops::resize(image, W, H, FilterType::Triangle);

    let mut tensor = F16NchwTensor::<W, H>::default();
    let height = H as usize;
    let width = W as usize;
    let slice = tensor.as_mut();

    for (x, y, pixel) in resized.enumerate_pixels() {
      let (x, y) = (x as usize, y as usize);
      for c in 0..RGB_CHANNELS {
        let index = c * height * width + y * width + x;
        slice[index] = f16::from_f32(f32::from(pixel[c]) / 255.0);
      }
    }
    tensor
  }
}
