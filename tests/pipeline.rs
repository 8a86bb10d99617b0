// 该文件是 Xunjian （巡检） 项目的一部分。
// tests/pipeline.rs - 批量检测流程测试
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
  cell::RefCell,
  fs,
  path::{Path, PathBuf},
};

use image::RgbImage;
use tempfile::TempDir;
use thiserror::Error;
use xunjian::{
  frame::{ImageSize, PreparedFrame},
  input::ImageDirectory,
  model::{Model, RawCandidates, ReplayModel},
  report::{DefectBox, REPORT_HEADER},
  task::BatchDetectionTask,
};

fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
  let path = dir.join(name);
  RgbImage::new(width, height).save(&path).unwrap();
  path
}

struct Workspace {
  _root: TempDir,
  input: PathBuf,
  candidates: PathBuf,
}

fn workspace() -> Workspace {
  let root = tempfile::tempdir().unwrap();
  let input = root.path().join("input");
  let candidates = root.path().join("candidates");
  fs::create_dir_all(&input).unwrap();
  fs::create_dir_all(&candidates).unwrap();
  Workspace {
    _root: root,
    input,
    candidates,
  }
}

#[test]
fn overlapping_candidates_collapse_into_one_report_entry() {
  let ws = workspace();
  write_png(&ws.input, "tower_01.png", 1280, 640);
  write_png(&ws.input, "tower_02.png", 640, 640);
  fs::write(ws.input.join("broken.jpg"), b"not really a jpeg").unwrap();
  fs::write(ws.input.join("notes.txt"), b"ignored").unwrap();

  // 前两个框 IoU 约 0.67，第五个属于其他类别
  fs::write(
    ws.candidates.join("tower_01.json"),
    "[[0,0,100,100,0.9,0],[20,0,120,100,0.8,0],[300,300,400,400,0.7,0],\
     [500,500,600,600,0.4,0],[300,0,400,100,0.95,1]]",
  )
  .unwrap();
  fs::write(ws.candidates.join("tower_02.json"), "[[0,0,50,50,0.3,0]]").unwrap();

  let model = ReplayModel::new(&ws.candidates);
  let report = BatchDetectionTask::default()
    .run_directory(&ImageDirectory::new(&ws.input), &model)
    .unwrap();

  assert_eq!(report.header, REPORT_HEADER);
  assert_eq!(report.count, 1);
  report.validate().unwrap();

  let record = &report.defect_details[0];
  assert_eq!(record.filename, "tower_01.png");
  assert_eq!(record.defect_count, 2);
  assert_eq!(
    record.defects,
    vec![
      DefectBox {
        bbox: [0, 0, 200, 100],
        confidence: 0.9,
      },
      DefectBox {
        bbox: [600, 300, 800, 400],
        confidence: 0.7,
      },
    ]
  );
}

#[test]
fn empty_directory_yields_empty_report() {
  let ws = workspace();
  let model = ReplayModel::new(&ws.candidates);
  let report = BatchDetectionTask::default()
    .run_directory(&ImageDirectory::new(&ws.input), &model)
    .unwrap();

  assert_eq!(report.count, 0);
  assert!(report.defect_details.is_empty());
  assert_eq!(report.to_string().trim(), "未检测到缺陷绝缘子");
}

#[test]
fn missing_directory_is_an_error() {
  let ws = workspace();
  let model = ReplayModel::new(&ws.candidates);
  let result = BatchDetectionTask::default()
    .run_directory(&ImageDirectory::new(ws.input.join("absent")), &model);
  assert!(result.is_err());
}

#[derive(Error, Debug)]
#[error("推理失败")]
struct StubError;

/// 文件名含 `fail` 时推理失败，否则返回一个覆盖全图的缺陷框
#[derive(Default)]
struct StubModel {
  seen: RefCell<Vec<(PathBuf, ImageSize)>>,
}

impl Model for StubModel {
  type Input = PreparedFrame;
  type Output = RawCandidates;
  type Error = StubError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self
      .seen
      .borrow_mut()
      .push((input.source.clone(), input.original));
    assert_eq!(input.tensor.width(), 640);
    assert_eq!(input.tensor.height(), 640);
    if input.source.to_string_lossy().contains("fail") {
      return Err(StubError);
    }
    Ok(RawCandidates::from_rows(&[[0.0, 0.0, 640.0, 640.0, 0.88, 0.0]]))
  }
}

#[test]
fn inference_failure_skips_only_that_image() {
  let ws = workspace();
  write_png(&ws.input, "fail_me.png", 32, 16);
  write_png(&ws.input, "ok.png", 320, 240);

  let model = StubModel::default();
  let report = BatchDetectionTask::default()
    .run_directory(&ImageDirectory::new(&ws.input), &model)
    .unwrap();

  assert_eq!(model.seen.borrow().len(), 2);
  assert!(model.seen.borrow().iter().any(|(path, size)| {
    path.ends_with("ok.png")
      && *size
        == ImageSize {
          width: 320,
          height: 240,
        }
  }));

  assert_eq!(report.count, 1);
  let record = &report.defect_details[0];
  assert_eq!(record.filename, "ok.png");
  assert_eq!(record.defects[0].bbox, [0, 0, 320, 240]);
}
