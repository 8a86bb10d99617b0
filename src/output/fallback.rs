// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/fallback.rs - 本地备份报告
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

use chrono::Local;
use thiserror::Error;
use tracing::{error, info};

use crate::{FromUrl, FromUrlWithScheme, report::DetectionReport};

pub const DEFAULT_FALLBACK_FILE: &str = "detection_report.json";

/// 发送失败时的本地落盘
///
/// 默认写入固定路径并覆盖上一次的备份；`versioned` 时在同一目录下
/// 按时间戳另存。
#[derive(Debug, Clone)]
pub struct FallbackFile {
  path: PathBuf,
  versioned: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FallbackFileError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("备份文件路径为空")]
  EmptyPath,
}

impl FromUrlWithScheme for FallbackFile {
  const SCHEME: &'static str = "file";
}

/// `file:///PATH[?versioned]`
impl FromUrl for FallbackFile {
  type Error = FallbackFileError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(FallbackFileError::SchemeMismatch(url.scheme().to_string()));
    }
    if url.path().is_empty() || url.path().ends_with('/') {
      return Err(FallbackFileError::EmptyPath);
    }

    let versioned = url.query_pairs().any(|(k, _)| k == "versioned");
    Ok(FallbackFile::new(url.path()).versioned(versioned))
  }
}

impl Default for FallbackFile {
  fn default() -> Self {
    FallbackFile::new(DEFAULT_FALLBACK_FILE)
  }
}

impl FallbackFile {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    FallbackFile {
      path: path.into(),
      versioned: false,
    }
  }

  pub fn versioned(mut self, versioned: bool) -> Self {
    self.versioned = versioned;
    self
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn target_path(&self) -> PathBuf {
    if !self.versioned {
      return self.path.clone();
    }

    let stem = self
      .path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "detection_report".to_string());
    let name = format!("{}_{}.json", stem, Local::now().format("%Y%m%d_%H%M%S_%3f"));
    self.path.with_file_name(name)
  }

  /// 以缩进 UTF-8 JSON 写出报告，返回实际写入路径
  pub fn save(&self, report: &DetectionReport) -> std::io::Result<PathBuf> {
    let path = self.target_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }

    let json = report.to_json_pretty().map_err(std::io::Error::other)?;
    std::fs::write(&path, json)?;
    info!("检测报告已保存到本地文件: {}", path.display());
    Ok(path)
  }
}
