// 该文件是 Xunjian （巡检） 项目的一部分。
// src/trigger.rs - 检测触发通道
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
  io::{ErrorKind, Read, Write},
  net::{Shutdown, TcpStream},
  time::Duration,
};

use thiserror::Error;
use tracing::debug;

use crate::{net::Endpoint, protocol};

pub const TRIGGER_TIMEOUT: Duration = Duration::from_secs(5);

// 与触发口令比较前最多读取的字节数
const TRIGGER_READ_LIMIT: usize = 1024;

#[derive(Error, Debug)]
pub enum TriggerError {
  #[error("发送检测请求超时，请检查网络连接")]
  Timeout,
  #[error("发送检测请求失败: {0}")]
  Io(#[from] std::io::Error),
}

fn classify(err: std::io::Error) -> TriggerError {
  match err.kind() {
    ErrorKind::TimedOut | ErrorKind::WouldBlock => TriggerError::Timeout,
    _ => TriggerError::Io(err),
  }
}

/// 向发送端写入触发口令，不等待回复
pub fn send_trigger(endpoint: Endpoint, timeout: Duration) -> Result<(), TriggerError> {
  let mut stream = TcpStream::connect_timeout(&endpoint.addr(), timeout).map_err(classify)?;
  stream.set_write_timeout(Some(timeout)).map_err(classify)?;
  stream.write_all(protocol::TRIGGER_TOKEN).map_err(classify)?;
  stream.flush().map_err(classify)?;
  // 对端可能已先行关闭
  let _ = stream.shutdown(Shutdown::Write);
  debug!("已向 {} 发送触发口令", endpoint);
  Ok(())
}

/// 读取触发连接上的数据并判断是否为触发口令
///
/// 读到口令长度、对端关闭、读满上限或读超时即停止。
pub fn read_trigger<R: Read>(stream: &mut R) -> std::io::Result<bool> {
  let mut buf = Vec::with_capacity(protocol::TRIGGER_TOKEN.len());
  let mut chunk = [0u8; TRIGGER_READ_LIMIT];
  while buf.len() < protocol::TRIGGER_TOKEN.len() {
    let room = TRIGGER_READ_LIMIT - buf.len();
    match stream.read(&mut chunk[..room]) {
      Ok(0) => break,
      Ok(n) => buf.extend_from_slice(&chunk[..n]),
      Err(e) if e.kind() == ErrorKind::Interrupted => continue,
      Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => break,
      Err(e) => return Err(e),
    }
  }
  debug!("收到触发数据: {:?}", String::from_utf8_lossy(&buf));
  Ok(protocol::is_trigger(&buf))
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  /// 每次只吐出一个字节的读取器
  struct Trickle(Cursor<Vec<u8>>);

  impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
      let len = buf.len().min(1);
      self.0.read(&mut buf[..len])
    }
  }

  #[test]
  fn reads_token_split_across_reads() {
    let mut trickle = Trickle(Cursor::new(b"START_DETECTION".to_vec()));
    assert!(read_trigger(&mut trickle).unwrap());
  }

  #[test]
  fn rejects_other_tokens() {
    assert!(!read_trigger(&mut Cursor::new(b"STOP".to_vec())).unwrap());
    assert!(!read_trigger(&mut Cursor::new(b"START_DETECTION please".to_vec())).unwrap());
  }

  #[test]
  fn refused_connection_is_reported() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = send_trigger(Endpoint::from(addr), Duration::from_secs(1)).unwrap_err();
    assert!(matches!(err, TriggerError::Io(_)));
  }
}
