// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/directory_record.rs - 接收端报告归档
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

use std::{
  fs::OpenOptions,
  io::Write,
  path::{Path, PathBuf},
};

use chrono::Local;
use thiserror::Error;

use crate::{FromUrl, FromUrlWithScheme, report::DetectionReport};

pub const DEFAULT_LOG_DIR: &str = "logs";
pub const DEFECT_LOG_FILE: &str = "insulator_defects.log";

/// 每份报告写一个带时间戳的 JSON 文件，并向累计日志追加摘要
#[derive(Debug, Clone)]
pub struct DirectoryRecordOutput {
  directory: PathBuf,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    Ok(DirectoryRecordOutput::new(uri.path()))
  }
}

impl Default for DirectoryRecordOutput {
  fn default() -> Self {
    DirectoryRecordOutput::new(DEFAULT_LOG_DIR)
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    DirectoryRecordOutput {
      directory: directory.into(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn log_path(&self) -> PathBuf {
    self.directory.join(DEFECT_LOG_FILE)
  }

  fn report_path(&self, timestamp: &str) -> PathBuf {
    let mut path = self.directory.join(format!("report_{}.json", timestamp));
    let mut suffix = 1;
    while path.exists() {
      path = self
        .directory
        .join(format!("report_{}_{}.json", timestamp, suffix));
      suffix += 1;
    }
    path
  }

  /// 返回 JSON 报告路径
  pub fn record(&self, report: &DetectionReport) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(&self.directory)?;

    let now = Local::now();
    let timestamp = now.format("%Y%m%d_%H%M%S_%3f").to_string();
    let report_file = self.report_path(&timestamp);

    let json = report.to_json_pretty().map_err(std::io::Error::other)?;
    std::fs::write(&report_file, json)?;

    let mut log = OpenOptions::new()
      .create(true)
      .append(true)
      .open(self.log_path())?;
    log.write_all(summary(report, &timestamp, &report_file).as_bytes())?;

    Ok(report_file)
  }
}

fn summary(report: &DetectionReport, timestamp: &str, report_file: &Path) -> String {
  let stamp = || Local::now().format("%Y-%m-%d %H:%M:%S");
  let mut text = format!("\n====== 检测报告 {} ======\n", timestamp);
  if report.count == 0 {
    text.push_str("未检测到缺陷绝缘子\n");
    return text;
  }

  text.push_str(&format!("缺陷图片总数：{}\n", report.count));
  for detail in &report.defect_details {
    text.push_str(&format!("[{}] INFO - 文件：{}\n", stamp(), detail.filename));
    text.push_str(&format!("缺陷数量：{}\n", detail.defect_count));
    for (i, defect) in detail.defects.iter().enumerate() {
      text.push_str(&format!("缺陷{}：{}\n", i + 1, defect));
    }
  }
  text.push_str(&format!(
    "[{}] INFO - 报告已保存至 {}\n",
    stamp(),
    report_file.display()
  ));
  text
}
