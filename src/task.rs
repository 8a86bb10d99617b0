// 该文件是 Xunjian （巡检） 项目的一部分。
// src/task.rs - 批量检测任务
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

use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
  frame::PreparedFrame,
  input::{ImageDirectory, ImageEntry, ImageFileInput, ImageFileInputError},
  model::{Model, RawCandidates},
  postprocess::PostProcessor,
  report::{DefectBox, DetectionReport, ReportBuilder},
};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ImageTaskError {
  #[error("图像读取失败: {0}")]
  Decode(#[from] ImageFileInputError),
  #[error("模型推理失败: {0}")]
  Inference(#[source] BoxError),
}

pub trait Task<I, M>: Sized {
  type Output;
  type Error;
  fn run_task(&self, input: I, model: &M) -> Result<Self::Output, Self::Error>;
}

/// 对一批图像依次执行 预处理 → 推理 → 后处理，汇总为一份报告
///
/// 单张图像失败只记录日志并跳过，不重试，也不影响其余图像。
#[derive(Debug, Clone, Default)]
pub struct BatchDetectionTask {
  postprocessor: PostProcessor,
}

impl BatchDetectionTask {
  pub fn new(postprocessor: PostProcessor) -> Self {
    BatchDetectionTask { postprocessor }
  }

  pub fn postprocessor(&self) -> &PostProcessor {
    &self.postprocessor
  }

  pub fn detect_image<M, ME>(
    &self,
    entry: &ImageEntry,
    model: &M,
  ) -> Result<Vec<DefectBox>, ImageTaskError>
  where
    M: Model<Input = PreparedFrame, Output = RawCandidates, Error = ME>,
    ME: std::error::Error + Send + Sync + 'static,
  {
    let frame = ImageFileInput::open(&entry.path)?.prepare();
    let now = Instant::now();
    let raw = model
      .infer(&frame)
      .map_err(|e| ImageTaskError::Inference(Box::new(e)))?;
    debug!("{} 推理完成，耗时: {:.2?}", entry.filename, now.elapsed());
    Ok(self.postprocessor.process(&raw, frame.original))
  }

  /// 列出目录后执行批量检测；只有目录本身无法读取时返回错误
  pub fn run_directory<M, ME>(
    &self,
    directory: &ImageDirectory,
    model: &M,
  ) -> std::io::Result<DetectionReport>
  where
    M: Model<Input = PreparedFrame, Output = RawCandidates, Error = ME>,
    ME: std::error::Error + Send + Sync + 'static,
  {
    let entries = directory.entries()?;
    match self.run_task(entries, model) {
      Ok(report) => Ok(report),
      Err(never) => match never {},
    }
  }
}

impl<I, M, ME> Task<I, M> for BatchDetectionTask
where
  I: IntoIterator<Item = ImageEntry>,
  M: Model<Input = PreparedFrame, Output = RawCandidates, Error = ME>,
  ME: std::error::Error + Send + Sync + 'static,
{
  type Output = DetectionReport;
  type Error = std::convert::Infallible;

  fn run_task(&self, input: I, model: &M) -> Result<Self::Output, Self::Error> {
    info!("开始批量检测...");
    let started = Instant::now();
    let mut builder = ReportBuilder::new();
    let mut processed = 0usize;
    let mut failed = 0usize;

    for entry in input {
      processed += 1;
      match self.detect_image(&entry, model) {
        Ok(defects) => {
          let found = defects.len();
          if builder.push_image(entry.filename.as_str(), defects) {
            info!("在图片 {} 中检测到 {} 个缺陷", entry.filename, found);
          }
        }
        Err(e) => {
          failed += 1;
          error!("处理图像 {} 时出错: {}", entry.filename, e);
        }
      }
    }

    let report = builder.build();
    info!(
      "批量检测完成: 共 {} 张, 失败 {} 张, 缺陷图片 {} 张, 耗时 {:.2?}",
      processed,
      failed,
      report.count,
      started.elapsed()
    );
    Ok(report)
  }
}
