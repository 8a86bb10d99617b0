// 该文件是 Xunjian （巡检） 项目的一部分。
// src/net.rs - 网络端点与带超时的 accept
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
  io::ErrorKind,
  net::{IpAddr, SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::error;
use url::{Host, Url};

use crate::{FromUrl, FromUrlWithScheme};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum EndpointError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("端点缺少主机: {0}")]
  MissingHost(String),
  #[error("端点缺少端口: {0}")]
  MissingPort(String),
  #[error("无法解析主机 {0}: {1}")]
  Resolve(String, std::io::Error),
}

/// `tcp://HOST:PORT` 形式的固定端点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
  addr: SocketAddr,
}

impl FromUrlWithScheme for Endpoint {
  const SCHEME: &'static str = "tcp";
}

impl FromUrl for Endpoint {
  type Error = EndpointError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(EndpointError::SchemeMismatch(url.scheme().to_string()));
    }

    let port = url
      .port()
      .ok_or_else(|| EndpointError::MissingPort(url.to_string()))?;
    let addr = match url.host() {
      Some(Host::Ipv4(ip)) => SocketAddr::new(IpAddr::V4(ip), port),
      Some(Host::Ipv6(ip)) => SocketAddr::new(IpAddr::V6(ip), port),
      Some(Host::Domain(domain)) => (domain, port)
        .to_socket_addrs()
        .map_err(|e| EndpointError::Resolve(domain.to_string(), e))?
        .next()
        .ok_or_else(|| {
          EndpointError::Resolve(
            domain.to_string(),
            std::io::Error::new(ErrorKind::NotFound, "没有可用地址"),
          )
        })?,
      None => return Err(EndpointError::MissingHost(url.to_string())),
    };

    Ok(Endpoint { addr })
  }
}

impl From<SocketAddr> for Endpoint {
  fn from(addr: SocketAddr) -> Self {
    Endpoint { addr }
  }
}

impl Endpoint {
  pub fn addr(&self) -> SocketAddr {
    self.addr
  }
}

impl std::fmt::Display for Endpoint {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "tcp://{}", self.addr)
  }
}

/// 最多等待 `timeout` 接受一个连接，超时返回 `None`
///
/// 监听套接字会被置为非阻塞；返回的连接恢复为阻塞模式。
pub fn accept_with_timeout(
  listener: &TcpListener,
  timeout: Duration,
) -> std::io::Result<Option<(TcpStream, SocketAddr)>> {
  listener.set_nonblocking(true)?;
  let deadline = Instant::now() + timeout;
  loop {
    match listener.accept() {
      Ok((stream, addr)) => {
        stream.set_nonblocking(false)?;
        return Ok(Some((stream, addr)));
      }
      Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
        let now = Instant::now();
        if now >= deadline {
          return Ok(None);
        }
        thread::sleep(ACCEPT_POLL_INTERVAL.min(deadline - now));
      }
      Err(e) => return Err(e),
    }
  }
}
