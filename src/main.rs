// 该文件是 Kanren （看人） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{Level, info};

use kanren::{
  FromUrl,
  config::AppConfig,
  model::YoloBuilder,
  output::draw::{Draw, embedded_font, load_font},
  server::{AppState, create_app, serve},
};

#[tokio::main]
async fn main() -> Result<()> {
  let args = args::Args::parse();

  tracing_subscriber::fmt()
    .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
    .init();

  info!("模型地址: {}", args.model);
  info!("暂存目录: {}", args.upload_dir.display());
  info!("结果目录: {}", args.processed_dir.display());

  let mut config = AppConfig::new(&args.upload_dir, &args.processed_dir);
  config.max_upload_bytes = args.max_upload_mb * 1024 * 1024;
  config.ensure_dirs().context("无法创建暂存或结果目录")?;

  info!("正在加载模型...");
  let model = YoloBuilder::from_url(&args.model)?
    .detect_config(config.detect.clone())
    .build()?;

  let font = match &args.font {
    Some(path) => {
      info!("标签字体: {}", path.display());
      load_font(path).with_context(|| format!("无法加载字体 {}", path.display()))?
    }
    None => embedded_font().context("无法加载内置字体")?,
  };
  let draw = Draw::new(config.colors.clone(), font);

  let app = create_app(Arc::new(AppState::new(config, model, draw)));
  let listener = tokio::net::TcpListener::bind(args.listen)
    .await
    .with_context(|| format!("无法监听 {}", args.listen))?;

  serve(listener, app).await?;
  info!("服务已退出");

  Ok(())
}
