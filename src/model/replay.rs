// 该文件是 Xunjian （巡检） 项目的一部分。
// src/model/replay.rs - 回放推理后端
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

//! 从磁盘回放预先导出的候选框，用于没有加速器的主机。
//!
//! 对图像 `NAME.ext`，读取 `<目录>/NAME.json`，内容为候选框行数组：
//! `[[x1, y1, x2, y2, confidence, class], ...]`。

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::PreparedFrame,
  model::{CandidateShapeError, MIN_CANDIDATE_COLUMNS, Model, RawCandidates},
};

#[derive(Error, Debug)]
pub enum ReplayModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("输入缺少文件名: {0}")]
  MissingStem(PathBuf),
  #[error("读取回放文件 {0} 失败: {1}")]
  IoError(PathBuf, std::io::Error),
  #[error("回放文件格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("候选框形状错误: {0}")]
  ShapeError(#[from] CandidateShapeError),
}

#[derive(Debug, Clone)]
pub struct ReplayModel {
  directory: PathBuf,
}

impl FromUrlWithScheme for ReplayModel {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayModel {
  type Error = ReplayModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ReplayModelError::SchemeMismatch);
    }

    Ok(ReplayModel::new(url.path()))
  }
}

impl ReplayModel {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    ReplayModel {
      directory: directory.into(),
    }
  }

  fn candidates_path(&self, input: &PreparedFrame) -> Result<PathBuf, ReplayModelError> {
    let stem = input
      .source
      .file_stem()
      .ok_or_else(|| ReplayModelError::MissingStem(input.source.clone()))?;
    Ok(
      self
        .directory
        .join(format!("{}.json", stem.to_string_lossy())),
    )
  }
}

impl Model for ReplayModel {
  type Input = PreparedFrame;
  type Output = RawCandidates;
  type Error = ReplayModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let path = self.candidates_path(input)?;
    debug!("读取回放候选框: {}", path.display());
    let raw = std::fs::read(&path).map_err(|e| ReplayModelError::IoError(path.clone(), e))?;
    let rows: Vec<Vec<f32>> = serde_json::from_slice(&raw)?;

    let columns = rows.first().map(Vec::len).unwrap_or(MIN_CANDIDATE_COLUMNS);
    if rows.iter().any(|row| row.len() != columns) {
      return Err(ReplayModelError::ShapeError(CandidateShapeError::Ragged {
        len: rows.iter().map(Vec::len).sum(),
        columns,
      }));
    }
    let data: Vec<f32> = rows.into_iter().flatten().collect();
    let candidates = RawCandidates::new(data, columns)?;
    debug!("回放候选框数量: {}", candidates.len());
    Ok(candidates)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{ImageSize, ModelTensor};

  fn frame(name: &str) -> PreparedFrame {
    PreparedFrame {
      tensor: ModelTensor::default(),
      original: ImageSize {
        width: 640,
        height: 640,
      },
      source: PathBuf::from("/input").join(name),
    }
  }

  #[test]
  fn replays_rows_by_image_stem() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join("pole_01.json"),
      "[[10, 10, 50, 50, 0.9, 0], [100, 100, 150, 150, 0.7, 1]]",
    )
    .unwrap();

    let model = ReplayModel::new(dir.path());
    let raw = model.infer(&frame("pole_01.JPG")).unwrap();
    assert_eq!(raw.len(), 2);
    assert_eq!(raw.rows().nth(1).unwrap()[4], 0.7);
  }

  #[test]
  fn empty_array_means_no_candidates() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("clean.json"), "[]").unwrap();

    let raw = ReplayModel::new(dir.path()).infer(&frame("clean.png")).unwrap();
    assert!(raw.is_empty());
  }

  #[test]
  fn rows_of_mixed_width_are_malformed() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join("odd.json"),
      "[[1, 2, 3, 4, 0.9, 0, 0.1], [1, 2, 3, 4, 0.8, 0]]",
    )
    .unwrap();

    let err = ReplayModel::new(dir.path()).infer(&frame("odd.png")).unwrap_err();
    assert!(matches!(err, ReplayModelError::ShapeError(_)));
  }

  #[test]
  fn missing_file_fails_the_image() {
    let dir = tempfile::tempdir().unwrap();
    let err = ReplayModel::new(dir.path()).infer(&frame("gone.png")).unwrap_err();
    assert!(matches!(err, ReplayModelError::IoError(..)));
  }

  #[test]
  fn parses_from_url() {
    let url = Url::parse("replay:///var/lib/xunjian/candidates").unwrap();
    let model = ReplayModel::from_url(&url).unwrap();
    assert_eq!(model.directory, PathBuf::from("/var/lib/xunjian/candidates"));
  }
}
