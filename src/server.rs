// 该文件是 Xunjian （巡检） 项目的一部分。
// src/server.rs - 边缘检测服务（发送端）
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

//! 发送端由两部分组成：
//!
//! - 触发监听线程：接受触发连接，读取口令，转交给检测工作者；
//! - 检测工作者：唯一执行检测的地方，一次只跑一个批次。
//!
//! 两者之间是容量为 1 的通道。工作者忙碌时最多排队一个触发，
//! 其余触发被记录并丢弃。

use std::{
  net::{SocketAddr, TcpListener},
  path::PathBuf,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
    mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError},
  },
  thread,
  time::Duration,
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::PreparedFrame,
  input::ImageDirectory,
  model::{Model, RawCandidates},
  net::{self, Endpoint},
  output::{DeliveryOutcome, DispatchError, ReportDispatcher},
  report::DetectionReport,
  task::BatchDetectionTask,
  trigger::{self, TRIGGER_TIMEOUT},
};

pub const DEFAULT_INPUT_DIR: &str = "testphoto/input";
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(1);

/// 发送端单次检测周期的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
  Idle,
  Running,
  Serializing,
  Sending,
  Fallback,
}

/// 可跨线程观察的发送端状态
#[derive(Debug, Clone)]
pub struct SenderStatus {
  state: Arc<Mutex<SenderState>>,
}

impl Default for SenderStatus {
  fn default() -> Self {
    SenderStatus {
      state: Arc::new(Mutex::new(SenderState::Idle)),
    }
  }
}

impl SenderStatus {
  pub fn get(&self) -> SenderState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set(&self, next: SenderState) {
    let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
    debug!("发送端状态: {:?} -> {:?}", *state, next);
    *state = next;
  }

  pub fn is_busy(&self) -> bool {
    self.get() != SenderState::Idle
  }
}

#[derive(Error, Debug)]
pub enum RunError {
  #[error("无法读取输入目录 {0}: {1}")]
  InputDirectory(PathBuf, std::io::Error),
  #[error("{0}")]
  Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone)]
pub struct EdgeServerConfig {
  pub listen: Endpoint,
  pub input_dir: PathBuf,
  pub accept_timeout: Duration,
  pub trigger_timeout: Duration,
}

impl EdgeServerConfig {
  pub fn new(listen: Endpoint) -> Self {
    EdgeServerConfig {
      listen,
      input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
      accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
      trigger_timeout: TRIGGER_TIMEOUT,
    }
  }

  pub fn with_input_dir(mut self, input_dir: impl Into<PathBuf>) -> Self {
    self.input_dir = input_dir.into();
    self
  }

  pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
    self.accept_timeout = timeout;
    self
  }
}

/// 边缘检测服务
pub struct EdgeServer<M> {
  listener: TcpListener,
  config: EdgeServerConfig,
  directory: ImageDirectory,
  task: BatchDetectionTask,
  model: M,
  dispatcher: ReportDispatcher,
  status: SenderStatus,
  shutdown: Arc<AtomicBool>,
}

impl<M, ME> EdgeServer<M>
where
  M: Model<Input = PreparedFrame, Output = RawCandidates, Error = ME>,
  ME: std::error::Error + Send + Sync + 'static,
{
  pub fn bind(
    config: EdgeServerConfig,
    task: BatchDetectionTask,
    model: M,
    dispatcher: ReportDispatcher,
  ) -> std::io::Result<Self> {
    let listener = TcpListener::bind(config.listen.addr())?;
    Ok(EdgeServer {
      listener,
      directory: ImageDirectory::new(&config.input_dir),
      config,
      task,
      model,
      dispatcher,
      status: SenderStatus::default(),
      shutdown: Arc::new(AtomicBool::new(false)),
    })
  }

  pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
    self.listener.local_addr()
  }

  pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
    self.shutdown.clone()
  }

  pub fn status(&self) -> SenderStatus {
    self.status.clone()
  }

  /// 完整执行一次检测周期: Running → Serializing → Sending (→ Fallback) → Idle
  pub fn run_once(&self) -> Result<DeliveryOutcome, RunError> {
    let result = self.run_cycle();
    self.status.set(SenderState::Idle);
    result
  }

  fn run_cycle(&self) -> Result<DeliveryOutcome, RunError> {
    self.status.set(SenderState::Running);
    let report: DetectionReport = self
      .task
      .run_directory(&self.directory, &self.model)
      .map_err(|e| RunError::InputDirectory(self.directory.path().to_path_buf(), e))?;

    self.status.set(SenderState::Serializing);
    let encoded = self.dispatcher.encode(&report)?;

    self.status.set(SenderState::Sending);
    match self.dispatcher.send(&encoded) {
      Ok(bytes) => Ok(DeliveryOutcome::Sent { bytes }),
      Err(send) => {
        self.status.set(SenderState::Fallback);
        Ok(self.dispatcher.save_fallback(&report, send)?)
      }
    }
  }

  /// 运行服务直到关闭标志被置位
  ///
  /// 当前线程作为检测工作者，触发监听在后台线程中运行。
  pub fn serve(self) -> std::io::Result<()> {
    let (tx, rx) = mpsc::sync_channel::<SocketAddr>(1);
    let listener = self.listener.try_clone()?;
    let config = self.config.clone();
    let shutdown = self.shutdown.clone();
    let status = self.status.clone();

    info!("边缘检测服务已启动，监听端口：{}", self.local_addr()?);
    let acceptor = thread::Builder::new()
      .name("trigger-listener".into())
      .spawn(move || listen_triggers(listener, config, shutdown, status, tx))?;

    self.work(rx);

    if acceptor.join().is_err() {
      error!("触发监听线程异常退出");
    }
    info!("边缘检测服务已停止");
    Ok(())
  }

  fn work(&self, rx: Receiver<SocketAddr>) {
    loop {
      match rx.recv_timeout(self.config.accept_timeout) {
        Ok(peer) => {
          info!("收到来自 {} 的检测请求，开始检测...", peer);
          match self.run_once() {
            Ok(DeliveryOutcome::Sent { bytes }) => debug!("本轮报告已发送 {} 字节", bytes),
            Ok(DeliveryOutcome::SavedToFallback { path, reason }) => {
              warn!("本轮报告未送达 ({})，已备份至 {}", reason, path.display())
            }
            Err(e) => error!("本轮检测失败: {}", e),
          }
        }
        Err(RecvTimeoutError::Timeout) => {
          if self.shutdown.load(Ordering::SeqCst) {
            break;
          }
        }
        Err(RecvTimeoutError::Disconnected) => break,
      }
    }
  }
}

fn listen_triggers(
  listener: TcpListener,
  config: EdgeServerConfig,
  shutdown: Arc<AtomicBool>,
  status: SenderStatus,
  tx: SyncSender<SocketAddr>,
) {
  while !shutdown.load(Ordering::SeqCst) {
    let (mut stream, peer) = match net::accept_with_timeout(&listener, config.accept_timeout) {
      Ok(Some(accepted)) => accepted,
      Ok(None) => continue,
      Err(e) => {
        error!("接受触发连接失败: {}", e);
        thread::sleep(config.accept_timeout);
        continue;
      }
    };

    if let Err(e) = stream.set_read_timeout(Some(config.trigger_timeout)) {
      warn!("设置触发连接超时失败: {}", e);
      continue;
    }
    match trigger::read_trigger(&mut stream) {
      Ok(true) => match tx.try_send(peer) {
        Ok(()) if status.is_busy() => {
          info!("检测正在进行中 ({:?})，来自 {} 的请求已排队", status.get(), peer)
        }
        Ok(()) => debug!("来自 {} 的检测请求已转交检测工作者", peer),
        Err(TrySendError::Full(_)) => {
          warn!("检测正在进行中且已有排队请求，丢弃来自 {} 的触发", peer)
        }
        Err(TrySendError::Disconnected(_)) => break,
      },
      Ok(false) => warn!("来自 {} 的未知触发口令，已忽略", peer),
      Err(e) => warn!("读取来自 {} 的触发失败: {}", peer, e),
    }
  }
  debug!("触发监听线程退出");
}
