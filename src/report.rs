// 该文件是 Xunjian （巡检） 项目的一部分。
// src/report.rs - 缺陷报告
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

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 报告标识，接收端据此确认载荷身份
pub const REPORT_HEADER: &str = "insulator_error";

/// 原图像素坐标下的缺陷框
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectBox {
  pub bbox: [u32; 4], // [x1, y1, x2, y2]
  pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDefectRecord {
  pub filename: String,
  pub defect_count: usize,
  pub defects: Vec<DefectBox>,
}

impl ImageDefectRecord {
  /// 没有缺陷的图像不产生记录
  pub fn new(filename: impl Into<String>, defects: Vec<DefectBox>) -> Option<Self> {
    if defects.is_empty() {
      return None;
    }
    Some(ImageDefectRecord {
      filename: filename.into(),
      defect_count: defects.len(),
      defects,
    })
  }
}

/// 一次检测批次的报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
  pub header: String,
  pub count: usize,
  pub defect_details: Vec<ImageDefectRecord>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReportError {
  #[error("报告标识错误: {0}")]
  HeaderMismatch(String),
  #[error("缺陷图片数 {count} 与明细条数 {details} 不一致")]
  CountMismatch { count: usize, details: usize },
  #[error("文件 {filename} 的缺陷数 {declared} 与缺陷框数 {actual} 不一致")]
  DefectCountMismatch {
    filename: String,
    declared: usize,
    actual: usize,
  },
  #[error("文件 {0} 没有缺陷框")]
  EmptyRecord(String),
}

impl Default for DetectionReport {
  fn default() -> Self {
    DetectionReport {
      header: REPORT_HEADER.to_string(),
      count: 0,
      defect_details: Vec::new(),
    }
  }
}

impl DetectionReport {
  pub fn total_defects(&self) -> usize {
    self.defect_details.iter().map(|d| d.defects.len()).sum()
  }

  /// 校验标识与计数不变量
  pub fn validate(&self) -> Result<(), ReportError> {
    if self.header != REPORT_HEADER {
      return Err(ReportError::HeaderMismatch(self.header.clone()));
    }
    if self.count != self.defect_details.len() {
      return Err(ReportError::CountMismatch {
        count: self.count,
        details: self.defect_details.len(),
      });
    }
    for detail in &self.defect_details {
      if detail.defects.is_empty() {
        return Err(ReportError::EmptyRecord(detail.filename.clone()));
      }
      if detail.defect_count != detail.defects.len() {
        return Err(ReportError::DefectCountMismatch {
          filename: detail.filename.clone(),
          declared: detail.defect_count,
          actual: detail.defects.len(),
        });
      }
    }
    Ok(())
  }

  /// 紧凑 UTF-8 JSON，用于网络传输
  pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(self)
  }

  /// 缩进 JSON，用于落盘
  pub fn to_json_pretty(&self) -> serde_json::Result<String> {
    serde_json::to_string_pretty(self)
  }
}

/// 面向操作员的文字报告
impl fmt::Display for DetectionReport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.count == 0 {
      return writeln!(f, "未检测到缺陷绝缘子");
    }

    writeln!(f, "====== 绝缘子缺陷报告 ======")?;
    writeln!(f, "缺陷图片总数：{}", self.count)?;
    for detail in &self.defect_details {
      writeln!(f)?;
      writeln!(f, "文件：{}", detail.filename)?;
      writeln!(f, "缺陷数量：{}", detail.defect_count)?;
      for (i, defect) in detail.defects.iter().enumerate() {
        writeln!(f, "缺陷{}：{}", i + 1, defect)?;
      }
    }
    Ok(())
  }
}

impl fmt::Display for DefectBox {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let [x1, y1, x2, y2] = self.bbox;
    write!(
      f,
      "置信度 {:.2} 位置 [{}, {}, {}, {}]",
      self.confidence, x1, y1, x2, y2
    )
  }
}

/// 逐图累积检测结果
///
/// 计数由明细长度导出，一张图像的记录要么完整加入，要么不加入。
#[derive(Debug, Default)]
pub struct ReportBuilder {
  details: Vec<ImageDefectRecord>,
}

impl ReportBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// 返回该图像是否被计入报告
  pub fn push_image(&mut self, filename: impl Into<String>, defects: Vec<DefectBox>) -> bool {
    match ImageDefectRecord::new(filename, defects) {
      Some(record) => {
        self.details.push(record);
        true
      }
      None => false,
    }
  }

  pub fn build(self) -> DetectionReport {
    DetectionReport {
      header: REPORT_HEADER.to_string(),
      count: self.details.len(),
      defect_details: self.details,
    }
  }
}
