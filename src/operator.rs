// 该文件是 Xunjian （巡检） 项目的一部分。
// src/operator.rs - 操作台会话状态
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
  sync::{Arc, Mutex, mpsc::Sender},
  thread::{self, JoinHandle},
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  net::Endpoint,
  receiver::StationEvent,
  trigger::{self, TRIGGER_TIMEOUT},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorState {
  Idle,
  Requesting,
  AwaitingReport,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
  #[error("已有检测请求在进行中 ({0:?})")]
  Busy(OperatorState),
  #[error("无法启动请求线程: {0}")]
  Spawn(String),
}

/// 操作台一侧的请求会话
///
/// 同一时刻只允许一个未完成的请求。触发在后台线程中发送，
/// 结果通过事件通道告知展示层。
#[derive(Debug, Clone)]
pub struct OperatorSession {
  state: Arc<Mutex<OperatorState>>,
  trigger: Endpoint,
  timeout: Duration,
  events: Sender<StationEvent>,
}

impl OperatorSession {
  pub fn new(trigger: Endpoint, events: Sender<StationEvent>) -> Self {
    OperatorSession {
      state: Arc::new(Mutex::new(OperatorState::Idle)),
      trigger,
      timeout: TRIGGER_TIMEOUT,
      events,
    }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn state(&self) -> OperatorState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// 发起一次检测请求，返回后台发送线程的句柄
  pub fn request_detection(&self) -> Result<JoinHandle<()>, RequestError> {
    {
      let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
      if *state != OperatorState::Idle {
        return Err(RequestError::Busy(*state));
      }
      *state = OperatorState::Requesting;
    }
    let _ = self
      .events
      .send(StationEvent::Status("正在发送检测请求...".into()));

    let session = self.clone();
    thread::Builder::new()
      .name("trigger-sender".into())
      .spawn(move || session.send_trigger())
      .map_err(|e| {
        self.transition(|_| Some(OperatorState::Idle));
        RequestError::Spawn(e.to_string())
      })
  }

  fn send_trigger(&self) {
    match trigger::send_trigger(self.trigger, self.timeout) {
      Ok(()) => {
        // 报告可能已先于此处到达
        self.transition(|s| {
          (s == OperatorState::Requesting).then_some(OperatorState::AwaitingReport)
        });
        info!("已向 {} 发送检测请求", self.trigger);
        let _ = self
          .events
          .send(StationEvent::Status("已发送检测请求，等待结果...".into()));
      }
      Err(e) => {
        warn!("检测请求发送失败: {}", e);
        self.transition(|_| Some(OperatorState::Idle));
        let _ = self.events.send(StationEvent::Status(e.to_string()));
      }
    }
  }

  /// 收到报告后回到空闲
  pub fn report_arrived(&self) {
    self.transition(|s| (s != OperatorState::Idle).then_some(OperatorState::Idle));
  }

  fn transition(&self, next: impl FnOnce(OperatorState) -> Option<OperatorState>) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(next) = next(*state) {
      debug!("操作台状态: {:?} -> {:?}", *state, next);
      *state = next;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    io::Read,
    net::{SocketAddr, TcpListener},
    sync::mpsc,
  };

  fn statuses(rx: &mpsc::Receiver<StationEvent>) -> Vec<String> {
    rx.try_iter()
      .filter_map(|e| match e {
        StationEvent::Status(s) => Some(s),
        _ => None,
      })
      .collect()
  }

  #[test]
  fn successful_request_awaits_report() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let (tx, rx) = mpsc::channel();
    let session = OperatorSession::new(Endpoint::from(listener.local_addr().unwrap()), tx);

    let handle = session.request_detection().unwrap();
    let (mut stream, _) = listener.accept().unwrap();
    let mut received = Vec::new();
    stream.read_to_end(&mut received).unwrap();
    handle.join().unwrap();

    assert_eq!(received, b"START_DETECTION");
    assert_eq!(session.state(), OperatorState::AwaitingReport);
    assert!(
      statuses(&rx)
        .iter()
        .any(|s| s == "已发送检测请求，等待结果...")
    );

    session.report_arrived();
    assert_eq!(session.state(), OperatorState::Idle);
  }

  #[test]
  fn second_request_is_rejected_while_outstanding() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let (tx, _rx) = mpsc::channel();
    let session = OperatorSession::new(Endpoint::from(listener.local_addr().unwrap()), tx);

    let handle = session.request_detection().unwrap();
    let _ = listener.accept().unwrap();
    handle.join().unwrap();

    assert_eq!(
      session.request_detection().unwrap_err(),
      RequestError::Busy(OperatorState::AwaitingReport)
    );
  }

  #[test]
  fn failed_request_returns_to_idle() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (tx, rx) = mpsc::channel();
    let session =
      OperatorSession::new(Endpoint::from(addr), tx).with_timeout(Duration::from_secs(1));
    session.request_detection().unwrap().join().unwrap();

    assert_eq!(session.state(), OperatorState::Idle);
    assert!(
      statuses(&rx)
        .iter()
        .any(|s| s.starts_with("发送检测请求失败"))
    );
  }

  #[test]
  fn report_in_idle_is_ignored() {
    let (tx, _rx) = mpsc::channel();
    let session = OperatorSession::new(Endpoint::from(SocketAddr::from(([127, 0, 0, 1], 9))), tx);
    session.report_arrived();
    assert_eq!(session.state(), OperatorState::Idle);
  }
}
