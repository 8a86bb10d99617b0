// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output.rs - 报告输出
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

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  protocol::{self, ProtocolError},
  report::DetectionReport,
};

mod directory_record;
mod fallback;
mod report_sender;

pub use self::directory_record::{
  DEFAULT_LOG_DIR, DEFECT_LOG_FILE, DirectoryRecordOutput, DirectoryRecordOutputError,
};
pub use self::fallback::{DEFAULT_FALLBACK_FILE, FallbackFile, FallbackFileError};
pub use self::report_sender::{DEFAULT_CONNECT_TIMEOUT, ReportSender};

pub trait Publish<R> {
  type Outcome;
  type Error;
  fn publish(&self, report: &R) -> Result<Self::Outcome, Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
  /// `bytes` 为 JSON 载荷长度
  Sent { bytes: usize },
  SavedToFallback { path: PathBuf, reason: String },
}

#[derive(Error, Debug)]
pub enum DispatchError {
  #[error("报告序列化失败: {0}")]
  SerializeError(#[from] serde_json::Error),
  #[error("生成报告过大: {0}")]
  ReportTooLarge(#[from] ProtocolError),
  #[error("发送失败 ({send}) 且本地备份失败: {fallback}")]
  FallbackFailed {
    send: std::io::Error,
    fallback: std::io::Error,
  },
}

/// 编码后的报告帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedReport {
  frame: Vec<u8>,
  payload_len: usize,
}

impl EncodedReport {
  pub fn frame(&self) -> &[u8] {
    &self.frame
  }

  /// JSON 载荷的字节数，不含帧头
  pub fn payload_len(&self) -> usize {
    self.payload_len
  }
}

/// 发送端的投递流程：序列化、大小检查、网络发送，失败时写本地备份
#[derive(Debug, Clone)]
pub struct ReportDispatcher {
  sender: ReportSender,
  fallback: FallbackFile,
}

impl ReportDispatcher {
  pub fn new(sender: ReportSender, fallback: FallbackFile) -> Self {
    ReportDispatcher { sender, fallback }
  }

  /// 序列化并编码为报告帧；过大的报告在此被拒绝，不会发送也不会备份
  pub fn encode(&self, report: &DetectionReport) -> Result<EncodedReport, DispatchError> {
    let payload = report.to_json_bytes()?;
    Ok(EncodedReport {
      frame: protocol::encode_frame(&payload)?,
      payload_len: payload.len(),
    })
  }

  /// 网络发送已编码的帧，返回已发送的载荷字节数
  pub fn send(&self, encoded: &EncodedReport) -> std::io::Result<usize> {
    self.sender.send(encoded.frame())?;
    info!("检测完成，已发送报告（{}字节）", encoded.payload_len());
    Ok(encoded.payload_len())
  }

  /// 发送失败后写本地备份
  pub fn save_fallback(
    &self,
    report: &DetectionReport,
    send: std::io::Error,
  ) -> Result<DeliveryOutcome, DispatchError> {
    warn!(
      "无法发送报告到接收服务器({}): {}，改为保存本地备份",
      self.sender.endpoint(),
      send
    );
    match self.fallback.save(report) {
      Ok(path) => Ok(DeliveryOutcome::SavedToFallback {
        path,
        reason: send.to_string(),
      }),
      Err(fallback) => Err(DispatchError::FallbackFailed { send, fallback }),
    }
  }

  /// 投递已编码的帧，发送失败时转为本地备份
  pub fn deliver(
    &self,
    report: &DetectionReport,
    encoded: &EncodedReport,
  ) -> Result<DeliveryOutcome, DispatchError> {
    match self.send(encoded) {
      Ok(bytes) => Ok(DeliveryOutcome::Sent { bytes }),
      Err(send) => self.save_fallback(report, send),
    }
  }
}

impl Publish<DetectionReport> for ReportDispatcher {
  type Outcome = DeliveryOutcome;
  type Error = DispatchError;

  fn publish(&self, report: &DetectionReport) -> Result<Self::Outcome, Self::Error> {
    let encoded = self.encode(report)?;
    self.deliver(report, &encoded)
  }
}

impl Publish<DetectionReport> for DirectoryRecordOutput {
  type Outcome = PathBuf;
  type Error = std::io::Error;

  fn publish(&self, report: &DetectionReport) -> Result<Self::Outcome, Self::Error> {
    self.record(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    net::Endpoint,
    report::{DefectBox, ReportBuilder},
  };
  use std::net::SocketAddr;

  fn dispatcher(fallback: &std::path::Path) -> ReportDispatcher {
    ReportDispatcher::new(
      ReportSender::new(Endpoint::from(SocketAddr::from(([127, 0, 0, 1], 9)))),
      FallbackFile::new(fallback),
    )
  }

  #[test]
  fn encoded_length_excludes_frame_header() {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = ReportBuilder::new();
    builder.push_image(
      "pole_12.png",
      vec![DefectBox {
        bbox: [5, 6, 70, 80],
        confidence: 0.73,
      }],
    );
    let report = builder.build();
    let payload = report.to_json_bytes().unwrap();

    let encoded = dispatcher(&dir.path().join("r.json")).encode(&report).unwrap();
    assert_eq!(encoded.payload_len(), payload.len());

    let header = format!("INSULATOR_REPORT:{}|", payload.len());
    assert_eq!(encoded.frame().len(), header.len() + payload.len());
    assert!(encoded.frame().starts_with(header.as_bytes()));
    assert!(encoded.frame().ends_with(&payload));
  }
}
