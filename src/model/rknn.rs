// 该文件是 Xunjian （巡检） 项目的一部分。
// src/model/rknn.rs - RKNN 推理后端
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::PreparedFrame,
  input::AsNchwTensor,
  model::{CandidateShapeError, MIN_CANDIDATE_COLUMNS, Model, RawCandidates},
};

const RKNN_NUM_INPUTS: u32 = 1;

/// 端到端检测头（无需额外解码）的 RKNN 模型，第 0 个输出为 [N, columns]
pub struct RknnModel {
  context: Context,
  columns: usize,
}

#[derive(Error, Debug)]
pub enum RknnModelError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型输出形状错误: {0}")]
  ShapeError(#[from] CandidateShapeError),
}

pub struct RknnModelBuilder {
  model_path: String,
  flags: InitFlags,
  columns: usize,
}

impl FromUrlWithScheme for RknnModelBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnModelBuilder {
  type Error = RknnModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut columns = MIN_CANDIDATE_COLUMNS;
    for (k, v) in url.query_pairs() {
      if k == "columns" {
        columns = v
          .parse()
          .map_err(|_| RknnModelError::ModelPathError(format!("无效的列数: {}", v)))?;
      }
    }

    Ok(RknnModelBuilder {
      model_path: url.path().to_string(),
      flags: InitFlags::default(),
      columns,
    })
  }
}

impl RknnModelBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn build(self) -> Result<RknnModel, RknnModelError> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != RKNN_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      );
      return Err(RknnModelError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        RKNN_NUM_INPUTS, num_inputs
      )));
    }
    if num_outputs < 1 {
      return Err(RknnModelError::ModelInvalid("模型没有输出".to_string()));
    }
    debug!("模型输入数量: {}, 输出数量: {}", num_inputs, num_outputs);
    info!("模型加载完成");

    Ok(RknnModel {
      context,
      columns: self.columns,
    })
  }
}

impl Model for RknnModel {
  type Input = PreparedFrame;
  type Output = RawCandidates;
  type Error = RknnModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("设置模型输入");
    let bytes = input.tensor.to_le_bytes();
    self
      .context
      .set_input(0, &bytes, TensorFormat::NCHW, TensorType::Float16)?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let data = output.get_f32(0)?;
    let candidates = RawCandidates::new(data.to_vec(), self.columns)?;
    debug!("候选框数量: {}", candidates.len());
    Ok(candidates)
  }
}
