// 该文件是 Xunjian （巡检） 项目的一部分。
// src/bin/operator_station.rs - 操作台
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
  io::BufRead,
  sync::mpsc::{self, Sender},
  thread,
};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use xunjian::{
  FromUrl,
  net::Endpoint,
  operator::OperatorSession,
  output::DirectoryRecordOutput,
  receiver::{ReceiverConfig, ReportReceiver, StationEvent},
};

/// 操作台参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 报告接收监听地址
  #[arg(long, value_name = "LISTEN", default_value = "tcp://0.0.0.0:12346")]
  pub listen: Url,
  /// 边缘检测服务的触发地址
  #[arg(long, value_name = "TRIGGER", default_value = "tcp://192.168.137.2:12345")]
  pub trigger: Url,
  /// 报告与日志保存目录，例如 folder:///srv/station/logs，缺省为当前目录下的 logs
  #[arg(long, value_name = "RECORD")]
  pub record: Option<Url>,
}

enum Console {
  Event(StationEvent),
  Start,
  Status,
  Quit,
}

fn read_commands(tx: Sender<Console>) {
  let stdin = std::io::stdin();
  for line in stdin.lock().lines() {
    let command = match line {
      Ok(line) => match line.trim() {
        "" | "start" => Console::Start,
        "status" => Console::Status,
        "quit" | "exit" => Console::Quit,
        other => {
          println!("未知命令: {}（回车/start 开始检测，status 查看状态，quit 退出）", other);
          continue;
        }
      },
      Err(e) => {
        warn!("读取标准输入失败: {}", e);
        Console::Quit
      }
    };
    let quit = matches!(command, Console::Quit);
    if tx.send(command).is_err() || quit {
      return;
    }
  }
  let _ = tx.send(Console::Quit);
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("监听地址: {}", args.listen);
  info!("触发地址: {}", args.trigger);

  let listen = Endpoint::from_url(&args.listen)?;
  let trigger = Endpoint::from_url(&args.trigger)?;
  let archive = match &args.record {
    Some(url) => DirectoryRecordOutput::from_url(url)?,
    None => DirectoryRecordOutput::default(),
  };
  info!("日志目录: {}", archive.directory().display());

  let (console_tx, console_rx) = mpsc::channel::<Console>();
  let (event_tx, event_rx) = mpsc::channel::<StationEvent>();

  let receiver = ReportReceiver::bind(
    ReceiverConfig::new(listen),
    archive,
    event_tx.clone(),
  )?
  .spawn()?;
  let session = OperatorSession::new(trigger, event_tx);

  // 两路输入汇入同一通道
  let forward = console_tx.clone();
  thread::spawn(move || {
    for event in event_rx {
      if forward.send(Console::Event(event)).is_err() {
        break;
      }
    }
  });
  let interrupt = console_tx.clone();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = interrupt.send(Console::Quit);
  })?;
  thread::spawn(move || read_commands(console_tx));

  println!("绝缘子缺陷检测操作台");
  println!("回车或输入 start 开始检测，status 查看状态，quit 退出");

  for message in console_rx {
    match message {
      Console::Start => {
        if let Err(e) = session.request_detection() {
          println!("{}", e);
        }
      }
      Console::Status => println!("当前状态: {:?}", session.state()),
      Console::Event(StationEvent::Status(status)) => println!("{}", status),
      Console::Event(StationEvent::ReportAccepted { report, archived }) => {
        session.report_arrived();
        println!("{}", report);
        if let Some(path) = archived {
          println!("报告文件: {}", path.display());
        }
      }
      Console::Quit => break,
    }
  }

  receiver.stop();
  info!("操作台已退出");
  Ok(())
}
