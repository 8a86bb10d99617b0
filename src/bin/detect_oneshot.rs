// 该文件是 Xunjian （巡检） 项目的一部分。
// src/bin/detect_oneshot.rs - 单次批量检测
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

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use xunjian::{
  FromUrl,
  input::ImageDirectory,
  model::ModelWrapper,
  net::Endpoint,
  output::{DeliveryOutcome, FallbackFile, Publish, ReportDispatcher, ReportSender},
  postprocess::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD, DEFAULT_TARGET_CLASS, PostProcessor,
  },
  server::DEFAULT_INPUT_DIR,
  task::BatchDetectionTask,
};

/// 对目录执行一次检测并输出报告
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理后端，例如 rknn:///path/to/model.rknn 或 replay:///path/to/candidates
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 待检测图片目录
  #[arg(long, value_name = "DIR", default_value = DEFAULT_INPUT_DIR)]
  pub input: PathBuf,
  /// 同时把报告发送到接收端，例如 tcp://192.168.137.1:12346
  #[arg(long, value_name = "REPORT")]
  pub send: Option<Url>,
  /// 发送失败时的本地备份，例如 file:///tmp/detection_report.json?versioned
  #[arg(long, value_name = "FALLBACK")]
  pub fallback: Option<Url>,

  #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
  pub confidence: f32,
  #[arg(long, default_value_t = DEFAULT_IOU_THRESHOLD)]
  pub nms_threshold: f32,
  #[arg(long, default_value_t = DEFAULT_TARGET_CLASS)]
  pub target_class: u32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入目录: {}", args.input.display());

  let model = ModelWrapper::from_url(&args.model)?;
  let task = BatchDetectionTask::new(
    PostProcessor::default()
      .with_confidence_threshold(args.confidence)
      .with_iou_threshold(args.nms_threshold)
      .with_target_class(args.target_class),
  );
  let post = task.postprocessor();
  info!(
    "置信度阈值: {}, NMS 阈值: {}, 目标类别: {}",
    post.confidence_threshold(),
    post.iou_threshold(),
    post.target_class()
  );

  let report = task.run_directory(&ImageDirectory::new(&args.input), &model)?;
  println!("{}", report.to_json_pretty()?);

  if let Some(url) = &args.send {
    let fallback = match &args.fallback {
      Some(target) => FallbackFile::from_url(target)?,
      None => FallbackFile::default(),
    };
    let dispatcher = ReportDispatcher::new(ReportSender::new(Endpoint::from_url(url)?), fallback);
    match dispatcher.publish(&report)? {
      DeliveryOutcome::Sent { bytes } => info!("报告已发送（{}字节）", bytes),
      DeliveryOutcome::SavedToFallback { path, reason } => {
        info!("报告未送达 ({})，已保存至 {}", reason, path.display())
      }
    }
  }

  Ok(())
}
