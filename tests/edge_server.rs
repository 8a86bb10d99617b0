// 该文件是 Xunjian （巡检） 项目的一部分。
// tests/edge_server.rs - 触发到报告的端到端测试
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
  fs,
  net::{SocketAddr, TcpListener},
  path::Path,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
    mpsc,
  },
  thread,
  time::Duration,
};

use image::RgbImage;
use xunjian::{
  frame::PreparedFrame,
  model::{Model, RawCandidates, ReplayModel},
  net::Endpoint,
  operator::{OperatorSession, OperatorState},
  output::{DeliveryOutcome, DirectoryRecordOutput, FallbackFile, ReportDispatcher, ReportSender},
  receiver::{ReceiverConfig, ReportReceiver, StationEvent},
  report::DetectionReport,
  server::{EdgeServer, EdgeServerConfig, SenderState},
  task::BatchDetectionTask,
  trigger::send_trigger,
};

const WAIT: Duration = Duration::from_secs(15);

fn loopback() -> Endpoint {
  Endpoint::from(SocketAddr::from(([127, 0, 0, 1], 0)))
}

fn prepare_inputs(root: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
  let input = root.join("input");
  let candidates = root.join("candidates");
  fs::create_dir_all(&input).unwrap();
  fs::create_dir_all(&candidates).unwrap();

  RgbImage::new(640, 480).save(input.join("span_3.png")).unwrap();
  fs::write(
    candidates.join("span_3.json"),
    "[[64,64,320,320,0.82,0],[70,70,330,330,0.61,0]]",
  )
  .unwrap();
  (input, candidates)
}

fn server_with<M, ME>(input: &Path, model: M, report_to: Endpoint, fallback: &Path) -> EdgeServer<M>
where
  M: Model<Input = PreparedFrame, Output = RawCandidates, Error = ME>,
  ME: std::error::Error + Send + Sync + 'static,
{
  let config = EdgeServerConfig::new(loopback())
    .with_input_dir(input)
    .with_accept_timeout(Duration::from_millis(100));
  let dispatcher = ReportDispatcher::new(
    ReportSender::new(report_to).with_timeout(Duration::from_secs(1)),
    FallbackFile::new(fallback),
  );
  EdgeServer::bind(config, BatchDetectionTask::default(), model, dispatcher).unwrap()
}

fn server_for(
  input: &Path,
  candidates: &Path,
  report_to: Endpoint,
  fallback: &Path,
) -> EdgeServer<ReplayModel> {
  server_with(input, ReplayModel::new(candidates), report_to, fallback)
}

/// 每次推理先报告开始，然后阻塞到测试放行
struct GatedModel {
  started: Mutex<mpsc::Sender<()>>,
  release: Mutex<mpsc::Receiver<()>>,
  runs: Arc<AtomicUsize>,
}

impl Model for GatedModel {
  type Input = PreparedFrame;
  type Output = RawCandidates;
  type Error = std::io::Error;

  fn infer(&self, _input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.runs.fetch_add(1, Ordering::SeqCst);
    let _ = self.started.lock().unwrap().send(());
    self
      .release
      .lock()
      .unwrap()
      .recv_timeout(WAIT)
      .map_err(std::io::Error::other)?;
    Ok(RawCandidates::from_rows(&[[64.0, 64.0, 320.0, 320.0, 0.82, 0.0]]))
  }
}

#[test]
fn trigger_produces_report_at_operator_station() {
  let root = tempfile::tempdir().unwrap();
  let (input, candidates) = prepare_inputs(root.path());
  let fallback = root.path().join("detection_report.json");

  let (event_tx, event_rx) = mpsc::channel();
  let receiver = ReportReceiver::bind(
    ReceiverConfig::new(loopback()),
    DirectoryRecordOutput::new(root.path().join("logs")),
    event_tx.clone(),
  )
  .unwrap()
  .spawn()
  .unwrap();

  let server = server_for(
    &input,
    &candidates,
    Endpoint::from(receiver.local_addr()),
    &fallback,
  );
  let trigger_addr = server.local_addr().unwrap();
  let shutdown = server.shutdown_handle();
  let status = server.status();
  let serving = thread::spawn(move || server.serve());

  let session = OperatorSession::new(Endpoint::from(trigger_addr), event_tx);
  session.request_detection().unwrap();

  let report: DetectionReport = loop {
    match event_rx.recv_timeout(WAIT).unwrap() {
      StationEvent::ReportAccepted { report, archived } => {
        assert!(archived.is_some());
        session.report_arrived();
        break *report;
      }
      StationEvent::Status(_) => continue,
    }
  };

  assert_eq!(session.state(), OperatorState::Idle);
  assert_eq!(report.count, 1);
  let record = &report.defect_details[0];
  assert_eq!(record.filename, "span_3.png");
  assert_eq!(record.defect_count, 1);
  assert_eq!(record.defects[0].bbox, [64, 48, 320, 240]);
  assert!(!fallback.exists());

  shutdown.store(true, Ordering::SeqCst);
  serving.join().unwrap().unwrap();
  assert_eq!(status.get(), SenderState::Idle);
  receiver.stop();
}

#[test]
fn unreachable_station_leaves_fallback_and_returns_to_idle() {
  let root = tempfile::tempdir().unwrap();
  let (input, candidates) = prepare_inputs(root.path());
  let fallback = root.path().join("detection_report.json");

  let closed = {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
  };
  let server = server_for(&input, &candidates, Endpoint::from(closed), &fallback);

  match server.run_once().unwrap() {
    DeliveryOutcome::SavedToFallback { path, .. } => assert_eq!(path, fallback),
    other => panic!("意外的结果: {:?}", other),
  }
  assert_eq!(server.status().get(), SenderState::Idle);

  let stored: DetectionReport =
    serde_json::from_str(&fs::read_to_string(&fallback).unwrap()).unwrap();
  assert_eq!(stored.count, 1);
  assert_eq!(stored.defect_details[0].defects[0].confidence, 0.82);
}

#[test]
fn triggers_during_a_run_queue_one_and_drop_the_rest() {
  let root = tempfile::tempdir().unwrap();
  let (input, _) = prepare_inputs(root.path());
  let fallback = root.path().join("detection_report.json");

  let (event_tx, event_rx) = mpsc::channel();
  let receiver = ReportReceiver::bind(
    ReceiverConfig::new(loopback()),
    DirectoryRecordOutput::new(root.path().join("logs")),
    event_tx,
  )
  .unwrap()
  .spawn()
  .unwrap();

  let (started_tx, started_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel();
  let runs = Arc::new(AtomicUsize::new(0));
  let model = GatedModel {
    started: Mutex::new(started_tx),
    release: Mutex::new(release_rx),
    runs: runs.clone(),
  };
  let server = server_with(
    &input,
    model,
    Endpoint::from(receiver.local_addr()),
    &fallback,
  );
  let trigger = Endpoint::from(server.local_addr().unwrap());
  let shutdown = server.shutdown_handle();
  let status = server.status();
  let serving = thread::spawn(move || server.serve());

  send_trigger(trigger, WAIT).unwrap();
  started_rx.recv_timeout(WAIT).unwrap();
  assert_eq!(status.get(), SenderState::Running);

  // 第一轮仍在推理：一个排队，一个丢弃
  send_trigger(trigger, WAIT).unwrap();
  send_trigger(trigger, WAIT).unwrap();
  thread::sleep(Duration::from_millis(500));
  assert_eq!(runs.load(Ordering::SeqCst), 1);
  assert_eq!(status.get(), SenderState::Running);

  release_tx.send(()).unwrap();
  started_rx.recv_timeout(WAIT).unwrap();
  release_tx.send(()).unwrap();

  let mut reports = 0;
  while reports < 2 {
    if let StationEvent::ReportAccepted { report, .. } = event_rx.recv_timeout(WAIT).unwrap() {
      assert_eq!(report.count, 1);
      reports += 1;
    }
  }

  let quiet = Duration::from_millis(1500);
  while let Ok(event) = event_rx.recv_timeout(quiet) {
    if let StationEvent::ReportAccepted { .. } = event {
      panic!("被丢弃的触发不应产生报告");
    }
  }
  assert_eq!(runs.load(Ordering::SeqCst), 2);
  assert!(started_rx.try_recv().is_err());
  assert_eq!(status.get(), SenderState::Idle);
  assert!(!fallback.exists());

  drop(release_tx);
  shutdown.store(true, Ordering::SeqCst);
  serving.join().unwrap().unwrap();
  receiver.stop();
}
