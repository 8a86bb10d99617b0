// 该文件是 Xunjian （巡检） 项目的一部分。
// src/frame.rs - 模型输入张量定义
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

use std::path::PathBuf;

use half::f16;
use thiserror::Error;

use crate::input::AsNchwTensor;

pub const RGB_CHANNELS: usize = 3;

/// 模型输入边长（正方形输入）
pub const MODEL_INPUT_SIZE: u32 = 640;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
}

/// NCHW 排布的半精度张量，像素值归一化到 [0, 1]，批大小固定为 1
#[derive(Debug, Clone)]
pub struct F16NchwTensor<const W: u32, const H: u32> {
  data: Box<[f16]>,
}

/// 模型实际使用的输入张量
pub type ModelTensor = F16NchwTensor<MODEL_INPUT_SIZE, MODEL_INPUT_SIZE>;

impl<const W: u32, const H: u32> F16NchwTensor<W, H> {
  pub const LEN: usize = RGB_CHANNELS * (W as usize) * (H as usize);

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 取 (c, y, x) 处的值
  pub fn get(&self, c: usize, y: usize, x: usize) -> Option<f16> {
    if c >= RGB_CHANNELS || y >= H as usize || x >= W as usize {
      return None;
    }
    self.data.get(c * (H as usize) * (W as usize) + y * (W as usize) + x).copied()
  }
}

impl<const W: u32, const H: u32> TryFrom<Vec<f16>> for F16NchwTensor<W, H> {
  type Error = FrameError;

  fn try_from(data: Vec<f16>) -> Result<Self, Self::Error> {
    if data.len() != Self::LEN {
      return Err(FrameError::ShapeMismatch {
        expected: Self::LEN,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
    })
  }
}

impl<const W: u32, const H: u32> Default for F16NchwTensor<W, H> {
  fn default() -> Self {
    let data = vec![f16::ZERO; Self::LEN].into_boxed_slice();
    Self { data }
  }
}

impl<const W: u32, const H: u32> AsMut<[f16]> for F16NchwTensor<W, H> {
  fn as_mut(&mut self) -> &mut [f16] {
    &mut self.data
  }
}

impl<const W: u32, const H: u32> AsNchwTensor<W, H> for F16NchwTensor<W, H> {
  fn as_nchw(&self) -> &[f16] {
    &self.data
  }
}

/// 原图像素尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
  pub width: u32,
  pub height: u32,
}

/// 预处理结果
///
/// 模型空间（张量）与原图空间（`original`）分开保存，
/// 后处理据 `original` 把检测框映射回原图像素坐标。
#[derive(Debug, Clone)]
pub struct PreparedFrame {
  pub tensor: ModelTensor,
  pub original: ImageSize,
  pub source: PathBuf,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_wrong_length() {
    let err = F16NchwTensor::<2, 2>::try_from(vec![f16::ZERO; 5]).unwrap_err();
    assert_eq!(
      err,
      FrameError::ShapeMismatch {
        expected: 12,
        actual: 5
      }
    );
  }

  #[test]
  fn indexes_in_chw_order() {
    let data: Vec<f16> = (0..12).map(|v| f16::from_f32(v as f32)).collect();
    let tensor = F16NchwTensor::<2, 2>::try_from(data).unwrap();
    assert_eq!(tensor.get(0, 0, 1), Some(f16::from_f32(1.0)));
    assert_eq!(tensor.get(1, 0, 0), Some(f16::from_f32(4.0)));
    assert_eq!(tensor.get(2, 1, 1), Some(f16::from_f32(11.0)));
    assert_eq!(tensor.get(3, 0, 0), None);
    let bytes = tensor.to_le_bytes();
    assert_eq!(bytes.len(), 24);
    assert_eq!(&bytes[2..4], &f16::from_f32(1.0).to_le_bytes());
  }
}
