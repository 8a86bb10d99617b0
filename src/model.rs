// 该文件是 Xunjian （巡检） 项目的一部分。
// src/model.rs - 推理引擎边界
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::PreparedFrame};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 每行至少包含 [x1, y1, x2, y2, confidence, class]
pub const MIN_CANDIDATE_COLUMNS: usize = 6;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CandidateShapeError {
  #[error("候选框列数不足: 至少需要 6 列, 实际 {0} 列")]
  TooFewColumns(usize),
  #[error("候选数组长度 {len} 不能被列数 {columns} 整除")]
  Ragged { len: usize, columns: usize },
}

/// 推理引擎输出的原始候选框，坐标位于模型输入空间
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidates {
  data: Box<[f32]>,
  columns: usize,
}

impl RawCandidates {
  pub fn new(data: Vec<f32>, columns: usize) -> Result<Self, CandidateShapeError> {
    if columns < MIN_CANDIDATE_COLUMNS {
      return Err(CandidateShapeError::TooFewColumns(columns));
    }
    if data.len() % columns != 0 {
      return Err(CandidateShapeError::Ragged {
        len: data.len(),
        columns,
      });
    }

    Ok(RawCandidates {
      data: data.into_boxed_slice(),
      columns,
    })
  }

  pub fn from_rows(rows: &[[f32; MIN_CANDIDATE_COLUMNS]]) -> Self {
    RawCandidates {
      data: rows.iter().flatten().copied().collect(),
      columns: MIN_CANDIDATE_COLUMNS,
    }
  }

  pub fn empty() -> Self {
    RawCandidates {
      data: Box::new([]),
      columns: MIN_CANDIDATE_COLUMNS,
    }
  }

  pub fn columns(&self) -> usize {
    self.columns
  }

  pub fn len(&self) -> usize {
    self.data.len() / self.columns
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn rows(&self) -> std::slice::ChunksExact<'_, f32> {
    self.data.chunks_exact(self.columns)
  }
}

mod replay;
pub use self::replay::{ReplayModel, ReplayModelError};

#[cfg(feature = "model_rknn")]
mod rknn;
#[cfg(feature = "model_rknn")]
pub use self::rknn::{RknnModel, RknnModelBuilder, RknnModelError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("回放模型错误: {0}")]
  ReplayModelError(#[from] ReplayModelError),
  #[cfg(feature = "model_rknn")]
  #[error("RKNN 模型错误: {0}")]
  RknnModelError(#[from] RknnModelError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 依据 URL 方案选择推理后端
pub enum ModelWrapper {
  Replay(ReplayModel),
  #[cfg(feature = "model_rknn")]
  Rknn(RknnModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayModel::SCHEME => Ok(ModelWrapper::Replay(ReplayModel::from_url(url)?)),
      #[cfg(feature = "model_rknn")]
      RknnModelBuilder::SCHEME => {
        let model = RknnModelBuilder::from_url(url)?.build()?;
        Ok(ModelWrapper::Rknn(model))
      }
      other => Err(ModelError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Model for ModelWrapper {
  type Input = PreparedFrame;
  type Output = RawCandidates;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      ModelWrapper::Replay(model) => model.infer(input).map_err(ModelError::from),
      #[cfg(feature = "model_rknn")]
      ModelWrapper::Rknn(model) => model.infer(input).map_err(ModelError::from),
    }
  }
}
