// 该文件是 Kanren （看人） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::path::Path;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;

use crate::{
  config::ClassColors,
  model::{DetectItem, DetectResult},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_BASELINE_OFFSET: i32 = 10; // 文本基线位于边框上方 10 像素
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum FontError {
  #[error("字体文件读取失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(#[from] ab_glyph::InvalidFont),
}

// DejaVu Sans，见 assets/
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

/// 从文件加载字体
pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc, FontError> {
  let data = std::fs::read(path)?;
  Ok(FontArc::try_from_vec(data)?)
}

/// 随程序一起编译的默认字体
pub fn embedded_font() -> Result<FontArc, FontError> {
  Ok(FontArc::try_from_slice(EMBEDDED_FONT)?)
}

/// `"<类别>: <置信度>"`，置信度保留两位小数
pub fn label_text(item: &DetectItem) -> String {
  format!("{}: {:.2}", item.label, item.score)
}

#[derive(Clone)]
pub struct Draw {
  font: FontArc,
  font_size: f32,
  colors: ClassColors,
}

impl Draw {
  pub fn new(colors: ClassColors, font: FontArc) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      colors,
    }
  }

  /// 使用内置字体
  pub fn with_embedded_font(colors: ClassColors) -> Result<Self, FontError> {
    Ok(Self::new(colors, embedded_font()?))
  }

  /// 在图像副本上依次绘制全部检测结果，原图不变
  pub fn draw_detections(&self, image: &RgbImage, result: &DetectResult) -> RgbImage {
    let mut canvas = image.clone();
    for item in result.iter() {
      self.draw_bbox_with_label(&mut canvas, item);
    }
    canvas
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, item: &DetectItem) {
    let color = Rgb(self.colors.color_of(&item.label));

    let x_min = item.bbox[0] as i32;
    let y_min = item.bbox[1] as i32;
    let x_max = item.bbox[2] as i32;
    let y_max = item.bbox[3] as i32;

    // 边框向内加粗
    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min + 1 - 2 * thickness;
      let height = y_max - y_min + 1 - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let scale = PxScale::from(self.font_size);
    let ascent = self.font.as_scaled(scale).ascent().ceil() as i32;
    draw_text_mut(
      image,
      color,
      x_min,
      y_min - LABEL_BASELINE_OFFSET - ascent,
      scale,
      &self.font,
      &label_text(item),
    );
  }
}
