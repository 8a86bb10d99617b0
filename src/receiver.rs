// 该文件是 Xunjian （巡检） 项目的一部分。
// src/receiver.rs - 报告接收服务
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
  io::{ErrorKind, Read},
  net::{SocketAddr, TcpListener},
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
    mpsc::Sender,
  },
  thread::{self, JoinHandle},
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  net::{self, Endpoint},
  output::{DirectoryRecordOutput, Publish},
  protocol::{FrameAssembler, MAX_INBOUND_FRAME, ProtocolError},
  report::{DetectionReport, ReportError},
};

pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 4096;

/// 发往展示层的事件
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
  Status(String),
  ReportAccepted {
    report: Box<DetectionReport>,
    archived: Option<PathBuf>,
  },
}

#[derive(Error, Debug)]
pub enum ReceiveError {
  #[error("连接读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("数据解析错误: {0}")]
  Protocol(#[from] ProtocolError),
  #[error("报告解码错误: {0}")]
  Decode(#[from] serde_json::Error),
  #[error("报告校验失败: {0}")]
  Invalid(#[from] ReportError),
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
  pub listen: Endpoint,
  pub accept_timeout: Duration,
  pub read_timeout: Duration,
  pub max_frame: usize,
}

impl ReceiverConfig {
  pub fn new(listen: Endpoint) -> Self {
    ReceiverConfig {
      listen,
      accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
      read_timeout: DEFAULT_READ_TIMEOUT,
      max_frame: MAX_INBOUND_FRAME,
    }
  }

  pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
    self.read_timeout = timeout;
    self
  }
}

/// 读取一个连接上的全部数据
///
/// 对端关闭或读超时视为数据结束；累计超过上限立即失败。
pub fn read_frame<R: Read>(stream: &mut R, limit: usize) -> Result<FrameAssembler, ReceiveError> {
  let mut assembler = FrameAssembler::with_limit(limit);
  let mut chunk = [0u8; READ_CHUNK];
  loop {
    match stream.read(&mut chunk) {
      Ok(0) => break,
      Ok(n) => assembler.push(&chunk[..n])?,
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
        debug!("读取超时，按数据结束处理");
        break;
      }
      Err(e) => return Err(e.into()),
    }
  }
  debug!(
    "连接数据读取完毕: {} 字节, 载荷起始 {:?}",
    assembler.len(),
    assembler.payload_start()
  );
  Ok(assembler)
}

/// 解码并校验完整的报告帧
pub fn parse_report(assembler: &FrameAssembler) -> Result<DetectionReport, ReceiveError> {
  let payload = assembler.finish()?;
  let report: DetectionReport = serde_json::from_slice(payload)?;
  report.validate()?;
  Ok(report)
}

pub struct ReportReceiver {
  listener: TcpListener,
  config: ReceiverConfig,
  archive: DirectoryRecordOutput,
  events: Sender<StationEvent>,
  shutdown: Arc<AtomicBool>,
}

/// 后台接收线程的句柄
pub struct ReceiverHandle {
  local_addr: SocketAddr,
  shutdown: Arc<AtomicBool>,
  thread: JoinHandle<()>,
}

impl ReceiverHandle {
  pub fn local_addr(&self) -> SocketAddr {
    self.local_addr
  }

  /// 置位关闭标志并等待线程退出，最多阻塞一个 accept 超时
  pub fn stop(self) {
    self.shutdown.store(true, Ordering::SeqCst);
    if self.thread.join().is_err() {
      error!("接收线程异常退出");
    }
  }
}

impl ReportReceiver {
  pub fn bind(
    config: ReceiverConfig,
    archive: DirectoryRecordOutput,
    events: Sender<StationEvent>,
  ) -> std::io::Result<Self> {
    let listener = TcpListener::bind(config.listen.addr())?;
    Ok(ReportReceiver {
      listener,
      config,
      archive,
      events,
      shutdown: Arc::new(AtomicBool::new(false)),
    })
  }

  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    self.listener.local_addr()
  }

  pub fn spawn(self) -> std::io::Result<ReceiverHandle> {
    let local_addr = self.local_addr()?;
    let shutdown = self.shutdown.clone();
    let thread = thread::Builder::new()
      .name("report-receiver".into())
      .spawn(move || self.run())?;
    Ok(ReceiverHandle {
      local_addr,
      shutdown,
      thread,
    })
  }

  fn status(&self, message: String) {
    // 展示层已退出时丢弃
    let _ = self.events.send(StationEvent::Status(message));
  }

  fn run(self) {
    match self.local_addr() {
      Ok(addr) => self.status(format!("绝缘子检测服务监听中，端口：{}", addr.port())),
      Err(e) => warn!("无法获取监听地址: {}", e),
    }

    while !self.shutdown.load(Ordering::SeqCst) {
      let (mut stream, peer) =
        match net::accept_with_timeout(&self.listener, self.config.accept_timeout) {
          Ok(Some(accepted)) => accepted,
          Ok(None) => continue,
          Err(e) => {
            if !self.shutdown.load(Ordering::SeqCst) {
              self.status(format!("服务异常: {}", e));
              thread::sleep(self.config.accept_timeout);
            }
            continue;
          }
        };

      debug!("接受来自 {} 的报告连接", peer);
      let received = stream
        .set_read_timeout(Some(self.config.read_timeout))
        .map_err(ReceiveError::from)
        .and_then(|()| read_frame(&mut stream, self.config.max_frame));
      drop(stream);

      match received.and_then(|assembler| parse_report(&assembler)) {
        Ok(report) => self.accept(report),
        Err(e) => {
          warn!("丢弃来自 {} 的连接: {}", peer, e);
          self.status(e.to_string());
        }
      }
    }
    info!("接收线程退出");
  }

  fn accept(&self, report: DetectionReport) {
    info!(
      "收到检测报告: 缺陷图片 {} 张, 缺陷 {} 个",
      report.count,
      report.total_defects()
    );
    let archived = match self.archive.publish(&report) {
      Ok(path) => {
        self.status(format!("报告已保存至 {}", path.display()));
        Some(path)
      }
      Err(e) => {
        error!("报告保存失败: {}", e);
        self.status(format!("报告保存失败: {}", e));
        None
      }
    };
    let _ = self.events.send(StationEvent::ReportAccepted {
      report: Box::new(report),
      archived,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{protocol::encode_frame, report::ReportBuilder};
  use std::io::Cursor;

  fn framed(report: &DetectionReport) -> Vec<u8> {
    encode_frame(&report.to_json_bytes().unwrap()).unwrap()
  }

  #[test]
  fn parses_valid_frame() {
    let mut builder = ReportBuilder::new();
    builder.push_image(
      "a.png",
      vec![crate::report::DefectBox {
        bbox: [1, 2, 3, 4],
        confidence: 0.6,
      }],
    );
    let report = builder.build();

    let assembler = read_frame(&mut Cursor::new(framed(&report)), MAX_INBOUND_FRAME).unwrap();
    assert_eq!(parse_report(&assembler).unwrap(), report);
  }

  #[test]
  fn rejects_wrong_header_tag() {
    let mut report = DetectionReport::default();
    report.header = "cat_pictures".into();
    let assembler = read_frame(&mut Cursor::new(framed(&report)), MAX_INBOUND_FRAME).unwrap();
    assert!(matches!(
      parse_report(&assembler),
      Err(ReceiveError::Invalid(ReportError::HeaderMismatch(_)))
    ));
  }

  #[test]
  fn rejects_non_json_payload() {
    let assembler =
      read_frame(&mut Cursor::new(b"INSULATOR_REPORT:3|abc".to_vec()), 1024).unwrap();
    assert!(matches!(
      parse_report(&assembler),
      Err(ReceiveError::Decode(_))
    ));
  }

  #[test]
  fn oversized_stream_fails_while_reading() {
    let data = vec![b'x'; 100];
    assert!(matches!(
      read_frame(&mut Cursor::new(data), 64),
      Err(ReceiveError::Protocol(ProtocolError::PayloadTooLarge { .. }))
    ));
  }
}
