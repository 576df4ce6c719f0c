// 该文件是 Kanren （看人） 项目的一部分。
// src/input/upload.rs - 上传文件暂存
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

use image::RgbImage;
use thiserror::Error;
use tracing::debug;

use crate::input::{DecodeError, decode_image_file};

#[derive(Error, Debug)]
pub enum StageError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  DecodeError(#[from] DecodeError),
}

/// 已写入暂存目录的上传文件
#[derive(Debug, Clone)]
pub struct StagedUpload {
  filename: String,
  path: PathBuf,
}

impl StagedUpload {
  /// 以原文件名写入暂存目录，同名文件直接覆盖
  pub fn write(dir: &Path, filename: &str, bytes: &[u8]) -> Result<Self, StageError> {
    let path = dir.join(filename);
    std::fs::write(&path, bytes)?;
    debug!("上传文件已暂存: {} ({} 字节)", path.display(), bytes.len());

    Ok(Self {
      filename: filename.to_string(),
      path,
    })
  }

  pub fn filename(&self) -> &str {
    &self.filename
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 从暂存路径读回并解码
  pub fn decode(&self) -> Result<RgbImage, StageError> {
    Ok(decode_image_file(&self.path)?)
  }
}
