// 该文件是 Kanren （看人） 项目的一部分。
// src/input.rs - 图像输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;

mod read_image_file;
mod upload;

pub use self::read_image_file::{ImageFileInput, ImageFileInputError};
pub use self::upload::{StageError, StagedUpload};

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Image has no pixel data")]
  EmptyImage,
}

/// 按文件内容（而非扩展名）识别格式并解码为 RGB 图像
pub fn decode_image_file(path: impl AsRef<Path>) -> Result<RgbImage, DecodeError> {
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  if image.width() == 0 || image.height() == 0 {
    return Err(DecodeError::EmptyImage);
  }
  Ok(image.into_rgb8())
}
