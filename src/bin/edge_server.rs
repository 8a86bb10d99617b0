// 该文件是 Xunjian （巡检） 项目的一部分。
// src/bin/edge_server.rs - 边缘检测服务
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

use std::{path::PathBuf, sync::atomic::Ordering, thread, time::Duration};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use xunjian::{
  FromUrl,
  model::ModelWrapper,
  net::Endpoint,
  output::{FallbackFile, ReportDispatcher, ReportSender},
  postprocess::{
    DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD, DEFAULT_TARGET_CLASS, PostProcessor,
  },
  server::{DEFAULT_INPUT_DIR, EdgeServer, EdgeServerConfig},
  task::BatchDetectionTask,
};

/// 边缘检测服务参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 推理后端，例如 rknn:///path/to/model.rknn 或 replay:///path/to/candidates
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 待检测图片目录
  #[arg(long, value_name = "DIR", default_value = DEFAULT_INPUT_DIR)]
  pub input: PathBuf,
  /// 触发监听地址
  #[arg(long, value_name = "LISTEN", default_value = "tcp://0.0.0.0:12345")]
  pub listen: Url,
  /// 报告接收端地址
  #[arg(long, value_name = "REPORT", default_value = "tcp://192.168.137.1:12346")]
  pub report: Url,
  /// 发送失败时的本地备份，例如 file:///var/lib/xunjian/detection_report.json?versioned，
  /// 缺省写入当前目录下的 detection_report.json
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
  info!("监听地址: {}", args.listen);
  info!("报告接收端: {}", args.report);

  let model = ModelWrapper::from_url(&args.model)?;
  let listen = Endpoint::from_url(&args.listen)?;
  let report = Endpoint::from_url(&args.report)?;

  let fallback = match &args.fallback {
    Some(url) => FallbackFile::from_url(url)?,
    None => FallbackFile::default(),
  };
  info!("本地备份: {}", fallback.path().display());

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

  let dispatcher = ReportDispatcher::new(ReportSender::new(report), fallback);
  let config = EdgeServerConfig::new(listen).with_input_dir(&args.input);
  let server = EdgeServer::bind(config, task, model, dispatcher)?;

  let shutdown = server.shutdown_handle();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    shutdown.store(true, Ordering::SeqCst);
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })?;

  server.serve()?;
  Ok(())
}
