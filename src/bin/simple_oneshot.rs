// 该文件是 Kanren （看人） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像检测
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use kanren::{
  FromUrl,
  config::{ClassColors, DetectConfig},
  input::ImageFileInput,
  model::YoloBuilder,
  output::{
    SaveImageFileOutput,
    draw::{Draw, embedded_font, load_font},
  },
  task::{OneShotTask, Task},
};

/// 对单张图像运行检测并保存标注结果
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 yolo:///models/yolov8s-world.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入图像，例如 image:///data/photo.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出图像，例如 image:///data/processed_photo.jpg
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 标签字体文件，默认使用内置字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型地址: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let input = ImageFileInput::from_url(&args.input)?;
  let model = YoloBuilder::from_url(&args.model)?
    .detect_config(DetectConfig::default())
    .build()?;

  let font = match &args.font {
    Some(path) => load_font(path)?,
    None => embedded_font()?,
  };
  let draw = Draw::new(ClassColors::default(), font);
  let output = SaveImageFileOutput::from_url(&args.output)?.with_draw(draw);

  info!("开始推理 {}...", input.name());
  let (_, result) = OneShotTask.run_task(input.into_image(), &model, &output)?;
  info!("检测到 {} 个对象，结果已保存到 {}", result.len(), output.path().display());

  Ok(())
}
