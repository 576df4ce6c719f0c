// 该文件是 Kanren （看人） 项目的一部分。
// src/model/yolo.rs - 基于 ONNX Runtime 的 YOLO 检测模型
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

use std::sync::Mutex;

use image::{Rgb, RgbImage, imageops};
use ndarray::{Array4, ArrayView2, ArrayViewD, Axis, Ix2};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Value;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::DetectConfig,
  model::{COCO_CLASSES, DetectItem, DetectResult, Model},
};

const YOLO_SCHEME: &str = "yolo";
const YOLO_DEFAULT_INPUT_SIZE: u32 = 640;
const YOLO_PAD_VALUE: u8 = 114;
const YOLO_BOX_CHANNELS: usize = 4;
const YOLO_STRIDES: [u32; 3] = [8, 16, 32];

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("输出形状错误: {0}")]
  ShapeError(#[from] ndarray::ShapeError),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
  #[error("推理会话已损坏")]
  SessionPoisoned,
}

fn ort_error(err: impl std::fmt::Display) -> YoloError {
  YoloError::OrtError(err.to_string())
}

pub struct YoloBuilder {
  model_path: String,
  input_size: u32,
  config: DetectConfig,
}

impl FromUrlWithScheme for YoloBuilder {
  const SCHEME: &'static str = YOLO_SCHEME;
}

impl FromUrl for YoloBuilder {
  type Error = YoloError;

  /// `yolo:///path/to/model.onnx?size=640`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let input_size = match url.query_pairs().find(|(k, _)| k == "size") {
      Some((_, v)) => v
        .parse::<u32>()
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| YoloError::ModelPathError(format!("无效的输入尺寸: {}", v)))?,
      None => YOLO_DEFAULT_INPUT_SIZE,
    };

    Ok(YoloBuilder {
      model_path: url.path().to_string(),
      input_size,
      config: DetectConfig::default(),
    })
  }
}

impl YoloBuilder {
  pub fn detect_config(mut self, config: DetectConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build(self) -> Result<Yolo, YoloError> {
    if !std::path::Path::new(&self.model_path).exists() {
      return Err(YoloError::ModelPathError(format!(
        "模型文件不存在: {}",
        self.model_path
      )));
    }

    info!("加载模型文件: {}", self.model_path);
    let session = Session::builder()
      .map_err(ort_error)?
      .with_execution_providers([CPUExecutionProvider::default().build()])
      .map_err(ort_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ort_error)?
      .commit_from_file(&self.model_path)
      .map_err(ort_error)?;

    let input_name = session
      .inputs
      .first()
      .map(|input| input.name.clone())
      .ok_or_else(|| YoloError::InvalidOutput("模型没有输入".to_string()))?;
    debug!("模型输入: {}, 输入尺寸: {}", input_name, self.input_size);
    info!(
      "模型加载完成, 置信度阈值: {}, NMS 阈值: {}, 类别: {:?}",
      self.config.confidence, self.config.iou, self.config.classes
    );

    Ok(Yolo {
      session: Mutex::new(session),
      input_name,
      input_size: self.input_size,
      config: self.config,
    })
  }
}

pub struct Yolo {
  session: Mutex<Session>,
  input_name: String,
  input_size: u32,
  config: DetectConfig,
}

impl Model for Yolo {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = YoloError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let (canvas, letterbox) = letterbox(input, self.input_size);
    let tensor = to_nchw_tensor(&canvas);

    debug!("设置模型输入");
    let input_value = Value::from_array(tensor).map_err(ort_error)?;

    let mut session = self.session.lock().map_err(|_| YoloError::SessionPoisoned)?;
    debug!("执行模型推理");
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => input_value])
      .map_err(ort_error)?;

    let output = outputs[0].try_extract_array::<f32>().map_err(ort_error)?;
    debug!("模型输出形状: {:?}", output.shape());

    let preds = prediction_view(output, self.input_size)?;
    let candidates = decode_predictions(preds, &self.config);
    let kept = non_max_suppression(candidates, self.config.iou, self.config.max_detections);

    let items: Vec<DetectItem> = kept
      .into_iter()
      .map(|item| DetectItem {
        bbox: letterbox.restore(item.bbox),
        ..item
      })
      .collect();

    debug!("检测到 {} 个物体", items.len());
    Ok(DetectResult::from(items))
  }
}

/// 等比缩放后居中放入正方形画布的变换参数
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
  width: f32,
  height: f32,
}

impl Letterbox {
  fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    [
      ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, self.width),
      ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, self.height),
      ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, self.width),
      ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, self.height),
    ]
  }
}

fn letterbox(image: &RgbImage, size: u32) -> (RgbImage, Letterbox) {
  let (w, h) = image.dimensions();
  let scale = (size as f32 / w as f32).min(size as f32 / h as f32);
  let new_w = ((w as f32 * scale).round() as u32).clamp(1, size);
  let new_h = ((h as f32 * scale).round() as u32).clamp(1, size);
  let pad_x = (size - new_w) / 2;
  let pad_y = (size - new_h) / 2;

  let resized = imageops::resize(image, new_w, new_h, imageops::FilterType::Triangle);
  let mut canvas = RgbImage::from_pixel(size, size, Rgb([YOLO_PAD_VALUE; 3]));
  imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

  (
    canvas,
    Letterbox {
      scale,
      pad_x: pad_x as f32,
      pad_y: pad_y as f32,
      width: w as f32,
      height: h as f32,
    },
  )
}

fn to_nchw_tensor(image: &RgbImage) -> Array4<f32> {
  let (w, h) = image.dimensions();
  Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
    image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
  })
}

/// 输入尺寸对应的锚点数，三个检测头的网格之和
fn anchor_count(input_size: u32) -> usize {
  YOLO_STRIDES
    .iter()
    .map(|stride| (input_size / stride) as usize)
    .map(|side| side * side)
    .sum()
}

/// 取出 `[通道, 锚点]` 视图，兼容 `[1, 锚点, 通道]` 的转置导出
fn prediction_view(
  output: ArrayViewD<'_, f32>,
  input_size: u32,
) -> Result<ArrayView2<'_, f32>, YoloError> {
  if output.ndim() != 3 || output.shape()[0] != 1 {
    return Err(YoloError::InvalidOutput(format!(
      "期望形状 [1, 4 + nc, N], 实际 {:?}",
      output.shape()
    )));
  }

  // 只有锚点数落在第一维时才转置
  let anchors = anchor_count(input_size);
  let preds = output.index_axis_move(Axis(0), 0).into_dimensionality::<Ix2>()?;
  let preds = if preds.nrows() == anchors && preds.ncols() != anchors {
    preds.reversed_axes()
  } else {
    preds
  };

  if preds.nrows() <= YOLO_BOX_CHANNELS {
    return Err(YoloError::InvalidOutput(format!(
      "通道数 {} 不足",
      preds.nrows()
    )));
  }
  Ok(preds)
}

/// 类别编号对应的名称
fn label_of(class_id: usize, num_classes: usize, classes: &[String]) -> String {
  if num_classes == classes.len() {
    classes[class_id].clone()
  } else if num_classes == COCO_CLASSES.len() {
    COCO_CLASSES[class_id].to_string()
  } else {
    format!("class_{}", class_id)
  }
}

/// 将原始输出解码为候选框（输入画布坐标），并按阈值与类别过滤
fn decode_predictions(preds: ArrayView2<'_, f32>, config: &DetectConfig) -> Vec<DetectItem> {
  let num_classes = preds.nrows() - YOLO_BOX_CHANNELS;
  let mut items = Vec::new();

  for anchor in 0..preds.ncols() {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, preds[[YOLO_BOX_CHANNELS + c, anchor]]))
      .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if score < config.confidence {
      continue;
    }

    let label = label_of(class_id, num_classes, &config.classes);
    if !config.is_wanted(&label) {
      continue;
    }

    let cx = preds[[0, anchor]];
    let cy = preds[[1, anchor]];
    let w = preds[[2, anchor]];
    let h = preds[[3, anchor]];

    items.push(DetectItem {
      label,
      score,
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
    });
  }

  items
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
  let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
  let inter = ix * iy;
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - inter;
  if union <= 0.0 { 0.0 } else { inter / union }
}

/// 按类别的贪心 NMS，结果按置信度降序
fn non_max_suppression(
  mut candidates: Vec<DetectItem>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<DetectItem> {
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut kept: Vec<DetectItem> = Vec::new();
  for candidate in candidates {
    if kept.len() >= max_detections {
      break;
    }
    let suppressed = kept
      .iter()
      .any(|k| k.label == candidate.label && iou(&k.bbox, &candidate.bbox) > iou_threshold);
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}
