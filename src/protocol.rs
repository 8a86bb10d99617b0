// 该文件是 Xunjian （巡检） 项目的一部分。
// src/protocol.rs - 触发与报告帧格式
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

//! 与套接字无关的帧编解码。
//!
//! 报告帧: `INSULATOR_REPORT:<十进制长度>|` 后接恰好 `<长度>` 字节的 UTF-8 JSON。
//! 触发帧: ASCII `START_DETECTION`，无回复。

use thiserror::Error;

pub const TRIGGER_TOKEN: &[u8] = b"START_DETECTION";
pub const FRAME_MARKER: &[u8] = b"INSULATOR_REPORT:";
pub const FRAME_SEPARATOR: u8 = b'|';

/// 发送端序列化后载荷上限
pub const MAX_OUTBOUND_PAYLOAD: usize = 5 * 1024 * 1024;
/// 接收端单个连接累计字节上限
pub const MAX_INBOUND_FRAME: usize = 10 * 1024 * 1024;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
  #[error("载荷过大: {size} 字节, 上限 {limit} 字节")]
  PayloadTooLarge { size: usize, limit: usize },
  #[error("缺少报告帧标记")]
  MissingMarker,
  #[error("缺少帧分隔符")]
  MissingSeparator,
  #[error("无效的长度字段: {0:?}")]
  InvalidLength(String),
  #[error("载荷长度不匹配: 声明 {declared} 字节, 实际 {actual} 字节")]
  LengthMismatch { declared: usize, actual: usize },
}

/// 去掉尾部空白后与触发口令完全一致
pub fn is_trigger(buf: &[u8]) -> bool {
  buf.trim_ascii_end() == TRIGGER_TOKEN
}

pub fn frame_header(len: usize) -> Vec<u8> {
  let mut header = FRAME_MARKER.to_vec();
  header.extend_from_slice(len.to_string().as_bytes());
  header.push(FRAME_SEPARATOR);
  header
}

/// 编码报告帧，超过发送上限直接拒绝
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
  if payload.len() > MAX_OUTBOUND_PAYLOAD {
    return Err(ProtocolError::PayloadTooLarge {
      size: payload.len(),
      limit: MAX_OUTBOUND_PAYLOAD,
    });
  }

  let mut frame = frame_header(payload.len());
  frame.extend_from_slice(payload);
  Ok(frame)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  haystack
    .windows(needle.len())
    .position(|window| window == needle)
}

/// 解析帧头，返回 (声明长度, 载荷起始位置)
///
/// 帧头到第一个 `|` 为止，必须包含帧标记；标记之后到 `|` 之间为十进制长度。
/// 尚未收到 `|` 时返回 `MissingSeparator`。
pub fn parse_header(buf: &[u8]) -> Result<(usize, usize), ProtocolError> {
  let separator = buf
    .iter()
    .position(|&b| b == FRAME_SEPARATOR)
    .ok_or(ProtocolError::MissingSeparator)?;
  let header = &buf[..separator];
  let marker = find(header, FRAME_MARKER).ok_or(ProtocolError::MissingMarker)?;

  let digits = header[marker + FRAME_MARKER.len()..].trim_ascii();
  let text = String::from_utf8_lossy(digits);
  if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
    return Err(ProtocolError::InvalidLength(text.into_owned()));
  }
  let declared: usize = text
    .parse()
    .map_err(|_| ProtocolError::InvalidLength(text.to_string()))?;

  Ok((declared, separator + 1))
}

/// 解码完整的报告帧，返回 JSON 载荷
pub fn decode_frame(buf: &[u8]) -> Result<&[u8], ProtocolError> {
  if find(buf, FRAME_MARKER).is_none() {
    return Err(ProtocolError::MissingMarker);
  }

  let (declared, start) = parse_header(buf)?;
  if declared > MAX_INBOUND_FRAME {
    return Err(ProtocolError::PayloadTooLarge {
      size: declared,
      limit: MAX_INBOUND_FRAME,
    });
  }

  let payload = &buf[start..];
  if payload.len() != declared {
    return Err(ProtocolError::LengthMismatch {
      declared,
      actual: payload.len(),
    });
  }
  Ok(payload)
}

/// 逐块累积连接数据
///
/// 累计字节超过上限、或帧头声明的长度超过上限时立即报错，无需等待连接结束。
/// 分隔符只在新到达的字节中查找，帧头解析一次后不再重复。
#[derive(Debug)]
pub struct FrameAssembler {
  buffer: Vec<u8>,
  limit: usize,
  // 已查找过分隔符的字节数
  scanned: usize,
  header_end: Option<usize>,
}

impl Default for FrameAssembler {
  fn default() -> Self {
    Self::with_limit(MAX_INBOUND_FRAME)
  }
}

impl FrameAssembler {
  pub fn with_limit(limit: usize) -> Self {
    FrameAssembler {
      buffer: Vec::new(),
      limit,
      scanned: 0,
      header_end: None,
    }
  }

  pub fn push(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
    if self.buffer.len() + chunk.len() > self.limit {
      return Err(ProtocolError::PayloadTooLarge {
        size: self.buffer.len() + chunk.len(),
        limit: self.limit,
      });
    }
    self.buffer.extend_from_slice(chunk);

    if self.header_end.is_some() {
      return Ok(());
    }
    let found = self.buffer[self.scanned..]
      .iter()
      .position(|&b| b == FRAME_SEPARATOR);
    let Some(offset) = found else {
      self.scanned = self.buffer.len();
      return Ok(());
    };

    let header_end = self.scanned + offset + 1;
    self.scanned = header_end;
    self.header_end = Some(header_end);
    if let Ok((declared, _)) = parse_header(&self.buffer[..header_end]) {
      if declared > self.limit {
        return Err(ProtocolError::PayloadTooLarge {
          size: declared,
          limit: self.limit,
        });
      }
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  /// 已收到帧头分隔符时返回载荷起始位置
  pub fn payload_start(&self) -> Option<usize> {
    self.header_end
  }

  pub fn finish(&self) -> Result<&[u8], ProtocolError> {
    decode_frame(&self.buffer)
  }
}
