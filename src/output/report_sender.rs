// 该文件是 Xunjian （巡检） 项目的一部分。
// src/output/report_sender.rs - 报告网络发送
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
  io::Write,
  net::{Shutdown, TcpStream},
  time::Duration,
};

use tracing::{debug, info};

use crate::net::Endpoint;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 向固定接收端点发送已编码的报告帧
#[derive(Debug, Clone)]
pub struct ReportSender {
  endpoint: Endpoint,
  timeout: Duration,
}

impl ReportSender {
  pub fn new(endpoint: Endpoint) -> Self {
    ReportSender {
      endpoint,
      timeout: DEFAULT_CONNECT_TIMEOUT,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn endpoint(&self) -> Endpoint {
    self.endpoint
  }

  /// 建立短连接，写完整帧后关闭
  pub fn send(&self, frame: &[u8]) -> std::io::Result<()> {
    info!("尝试连接到 {}...", self.endpoint);
    let mut stream = TcpStream::connect_timeout(&self.endpoint.addr(), self.timeout)?;
    stream.set_write_timeout(Some(self.timeout))?;
    stream.write_all(frame)?;
    stream.flush()?;
    stream.shutdown(Shutdown::Write)?;
    debug!("已向 {} 写入 {} 字节", self.endpoint, frame.len());
    Ok(())
  }
}
