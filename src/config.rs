// 该文件是 Kanren （看人） 项目的一部分。
// src/config.rs - 进程级固定配置
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

use std::path::{Path, PathBuf};

/// 允许上传的文件扩展名（小写）
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "gif"];

/// 只检测的类别
pub const DETECT_CLASSES: [&str; 1] = ["person"];

const CONFIDENCE_THRESHOLD: f32 = 0.2;
const IOU_THRESHOLD: f32 = 0.5;
const MAX_DETECTIONS: usize = 300;
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

const PERSON_COLOR: [u8; 3] = [255, 255, 0]; // 黄色
const FALLBACK_COLOR: [u8; 3] = [0, 0, 255]; // 蓝色

/// 检测器参数，启动时确定，之后不再修改
#[derive(Debug, Clone)]
pub struct DetectConfig {
  /// 置信度阈值 (0.0 - 1.0)
  pub confidence: f32,
  /// NMS IOU 阈值 (0.0 - 1.0)
  pub iou: f32,
  /// 单张图像最多保留的检测数
  pub max_detections: usize,
  /// 类别白名单
  pub classes: Vec<String>,
}

impl Default for DetectConfig {
  fn default() -> Self {
    Self {
      confidence: CONFIDENCE_THRESHOLD,
      iou: IOU_THRESHOLD,
      max_detections: MAX_DETECTIONS,
      classes: DETECT_CLASSES.iter().map(|c| c.to_string()).collect(),
    }
  }
}

impl DetectConfig {
  pub fn is_wanted(&self, label: &str) -> bool {
    self.classes.iter().any(|c| c == label)
  }
}

/// 类别到颜色的固定映射，未登记的类别使用回退颜色
#[derive(Debug, Clone)]
pub struct ClassColors {
  table: Vec<(String, [u8; 3])>,
  fallback: [u8; 3],
}

impl Default for ClassColors {
  fn default() -> Self {
    Self {
      table: vec![("person".to_string(), PERSON_COLOR)],
      fallback: FALLBACK_COLOR,
    }
  }
}

impl ClassColors {
  pub fn color_of(&self, label: &str) -> [u8; 3] {
    self
      .table
      .iter()
      .find(|(name, _)| name == label)
      .map(|(_, color)| *color)
      .unwrap_or(self.fallback)
  }

  pub fn fallback(&self) -> [u8; 3] {
    self.fallback
  }
}

/// 服务配置
#[derive(Debug, Clone)]
pub struct AppConfig {
  /// 上传暂存目录
  pub upload_dir: PathBuf,
  /// 处理结果目录
  pub processed_dir: PathBuf,
  /// 上传请求体上限（字节）
  pub max_upload_bytes: usize,
  pub detect: DetectConfig,
  pub colors: ClassColors,
}

impl AppConfig {
  pub fn new(upload_dir: impl Into<PathBuf>, processed_dir: impl Into<PathBuf>) -> Self {
    Self {
      upload_dir: upload_dir.into(),
      processed_dir: processed_dir.into(),
      max_upload_bytes: MAX_UPLOAD_BYTES,
      detect: DetectConfig::default(),
      colors: ClassColors::default(),
    }
  }

  /// 创建暂存目录与结果目录（已存在时忽略）
  pub fn ensure_dirs(&self) -> std::io::Result<()> {
    std::fs::create_dir_all(&self.upload_dir)?;
    std::fs::create_dir_all(&self.processed_dir)?;
    Ok(())
  }

  pub fn processed_path(&self, filename: &str) -> PathBuf {
    self.processed_dir.join(format!("processed_{}", filename))
  }
}

/// 扩展名检查：取最后一个 `.` 之后的部分，大小写不敏感
pub fn allowed_file(filename: &str) -> bool {
  match filename.rsplit_once('.') {
    Some((_, ext)) => {
      let ext = ext.to_lowercase();
      ALLOWED_EXTENSIONS.contains(&ext.as_str())
    }
    None => false,
  }
}

/// 只保留文件名的最后一段，避免写出暂存目录
pub fn sanitize_filename(filename: &str) -> Option<String> {
  Path::new(filename)
    .file_name()
    .and_then(|name| name.to_str())
    .filter(|name| !name.is_empty())
    .map(str::to_string)
}
