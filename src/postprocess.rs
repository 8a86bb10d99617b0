// 该文件是 Xunjian （巡检） 项目的一部分。
// src/postprocess.rs - 检测后处理（阈值过滤、NMS、坐标映射）
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

use tracing::debug;

use crate::{
  frame::{ImageSize, MODEL_INPUT_SIZE},
  model::RawCandidates,
  report::DefectBox,
};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_TARGET_CLASS: u32 = 0;

// 避免零面积框除零
const IOU_EPSILON: f32 = 1e-16;

/// 模型空间中的一个候选框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub bbox: [f32; 4], // [x1, y1, x2, y2]
  pub confidence: f32,
  pub class_id: f32,
}

impl Candidate {
  /// `row` 至少 6 列，由 `RawCandidates` 保证
  pub fn from_row(row: &[f32]) -> Self {
    Candidate {
      bbox: [row[0], row[1], row[2], row[3]],
      confidence: row[4],
      class_id: row[5],
    }
  }

  pub fn area(&self) -> f32 {
    (self.bbox[2] - self.bbox[0]) * (self.bbox[3] - self.bbox[1])
  }
}

/// 两个轴对齐矩形的交并比
pub fn iou(a: &Candidate, b: &Candidate) -> f32 {
  let xx1 = a.bbox[0].max(b.bbox[0]);
  let yy1 = a.bbox[1].max(b.bbox[1]);
  let xx2 = a.bbox[2].min(b.bbox[2]);
  let yy2 = a.bbox[3].min(b.bbox[3]);

  let inter = (xx2 - xx1).max(0.0) * (yy2 - yy1).max(0.0);
  let union = a.area() + b.area() - inter;
  inter / (union + IOU_EPSILON)
}

/// 单轮贪心非极大值抑制
///
/// 置信度严格大于 `conf_threshold` 的候选框参与；按置信度降序稳定排序，
/// 置信度相同者保持输入顺序。返回顺序即保留顺序。
pub fn nms(candidates: &[Candidate], conf_threshold: f32, iou_threshold: f32) -> Vec<Candidate> {
  let mut remaining: Vec<Candidate> = candidates
    .iter()
    .filter(|c| c.confidence > conf_threshold)
    .copied()
    .collect();
  if remaining.is_empty() {
    return Vec::new();
  }

  remaining.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut keep = Vec::new();
  while !remaining.is_empty() {
    let best = remaining.remove(0);
    remaining.retain(|c| iou(&best, c) <= iou_threshold);
    keep.push(best);
  }

  keep
}

/// 把模型空间坐标按轴线性缩放到原图空间，截断取整
///
/// 先把坐标夹到模型输入范围内；截断后退化为零宽或零高的框返回 `None`。
pub fn remap_bbox(bbox: [f32; 4], input: ImageSize, original: ImageSize) -> Option<[u32; 4]> {
  let scale = |v: f32, input_len: u32, orig_len: u32| -> u32 {
    let v = f64::from(v).clamp(0.0, f64::from(input_len));
    (v * f64::from(orig_len) / f64::from(input_len)) as u32
  };

  let x1 = scale(bbox[0], input.width, original.width);
  let y1 = scale(bbox[1], input.height, original.height);
  let x2 = scale(bbox[2], input.width, original.width);
  let y2 = scale(bbox[3], input.height, original.height);

  if x1 >= x2 || y1 >= y2 {
    return None;
  }
  Some([x1, y1, x2, y2])
}

const MODEL_SPACE: ImageSize = ImageSize {
  width: MODEL_INPUT_SIZE,
  height: MODEL_INPUT_SIZE,
};

/// 检测后处理器
#[derive(Debug, Clone)]
pub struct PostProcessor {
  confidence_threshold: f32,
  iou_threshold: f32,
  target_class: u32,
}

impl Default for PostProcessor {
  fn default() -> Self {
    PostProcessor {
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      target_class: DEFAULT_TARGET_CLASS,
    }
  }
}

impl PostProcessor {
  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_target_class(mut self, class_id: u32) -> Self {
    self.target_class = class_id;
    self
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence_threshold
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  pub fn target_class(&self) -> u32 {
    self.target_class
  }

  /// 过滤 + NMS + 类别筛选 + 坐标映射，输出顺序为 NMS 保留顺序
  pub fn process(&self, raw: &RawCandidates, original: ImageSize) -> Vec<DefectBox> {
    let candidates: Vec<Candidate> = raw.rows().map(Candidate::from_row).collect();
    let kept = nms(&candidates, self.confidence_threshold, self.iou_threshold);
    debug!("NMS: {} 个候选框保留 {} 个", candidates.len(), kept.len());

    let target = self.target_class as f32;
    kept
      .into_iter()
      // NMS 已按阈值过滤，这里再次确认置信度
      .filter(|c| c.class_id == target && c.confidence >= self.confidence_threshold)
      .filter_map(|c| match remap_bbox(c.bbox, MODEL_SPACE, original) {
        Some(bbox) => Some(DefectBox {
          bbox,
          confidence: c.confidence,
        }),
        None => {
          debug!("丢弃映射后退化的检测框: {:?}", c.bbox);
          None
        }
      })
      .collect()
  }
}
