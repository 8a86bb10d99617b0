// 该文件是 Xunjian （巡检） 项目的一部分。
// src/input/image_directory.rs - 待检图像目录
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

use tracing::{debug, warn};

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// 扩展名为 png/jpg/jpeg（不区分大小写）
pub fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
  pub filename: String,
  pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImageDirectory {
  directory: PathBuf,
}

impl ImageDirectory {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    ImageDirectory {
      directory: directory.into(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.directory
  }

  /// 按目录枚举顺序列出图像文件，不排序
  pub fn entries(&self) -> std::io::Result<Vec<ImageEntry>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(&self.directory)? {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          warn!("读取目录项失败: {}", e);
          continue;
        }
      };

      let path = entry.path();
      if !is_image_file(&path) {
        debug!("跳过非图像文件: {}", path.display());
        continue;
      }

      entries.push(ImageEntry {
        filename: entry.file_name().to_string_lossy().into_owned(),
        path,
      });
    }

    debug!(
      "目录 {} 中共有 {} 个图像文件",
      self.directory.display(),
      entries.len()
    );
    Ok(entries)
  }
}
