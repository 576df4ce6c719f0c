// 该文件是 Kanren （看人） 项目的一部分。
// src/server.rs - 上传表单与检测服务
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

use std::sync::Arc;

use axum::{
  Router,
  body::Bytes,
  extract::{
    DefaultBodyLimit, Multipart, State,
    multipart::{MultipartError, MultipartRejection},
  },
  http::{StatusCode, header},
  response::{Html, IntoResponse, Redirect, Response},
  routing::{get, post},
};
use image::RgbImage;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
  config::{AppConfig, allowed_file, sanitize_filename},
  input::StagedUpload,
  model::{DetectResult, Model},
  output::{SaveImageFileOutput, draw::Draw, encode_jpeg},
  task::{OneShotTask, Task},
};

const UPLOAD_FORM: &str = r#"<!doctype html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Image Upload Form</title>
</head>
<body>
    <h1>Upload an Image</h1>
    <form action="/upload" method="post" enctype="multipart/form-data">
        <label for="file">Choose an image to upload:</label>
        <input type="file" id="file" name="file" accept="image/*" required>
        <br><br>
        <input type="submit" value="Upload Image">
    </form>
</body>
</html>
"#;

const FILE_FIELD: &str = "file";

/// 请求间共享的只读状态
pub struct AppState<M> {
  pub config: AppConfig,
  pub model: M,
  pub draw: Draw,
}

impl<M> AppState<M> {
  pub fn new(config: AppConfig, model: M, draw: Draw) -> Self {
    Self {
      config,
      model,
      draw,
    }
  }
}

#[derive(Error, Debug)]
pub enum UploadError {
  #[error("请求中没有上传文件")]
  MissingFile,
  #[error("Invalid file format.")]
  InvalidFormat,
  #[error("Error: Could not load image.")]
  CouldNotLoad,
  #[error("上传数据读取失败: {0}")]
  Multipart(#[from] MultipartError),
  #[error("内部错误: {0}")]
  Internal(String),
}

impl IntoResponse for UploadError {
  fn into_response(self) -> Response {
    let message = self.to_string();
    match self {
      UploadError::MissingFile => Redirect::to("/").into_response(),
      UploadError::InvalidFormat | UploadError::CouldNotLoad => message.into_response(),
      UploadError::Multipart(err) => (err.status(), err.body_text()).into_response(),
      UploadError::Internal(_) => {
        error!("{}", message);
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
      }
    }
  }
}

pub fn create_app<M>(state: Arc<AppState<M>>) -> Router
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let body_limit = state.config.max_upload_bytes;
  Router::new()
    .route("/", get(upload_form))
    .route("/upload", post(upload_file::<M>))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// 运行服务直到收到 Ctrl-C
pub async fn serve(listener: TcpListener, app: Router) -> std::io::Result<()> {
  info!("服务监听于 {}", listener.local_addr()?);
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    error!("无法监听中断信号: {}", e);
    return;
  }
  info!("收到中断信号，准备退出...");
}

async fn upload_form() -> Html<&'static str> {
  Html(UPLOAD_FORM)
}

async fn upload_file<M>(
  State(state): State<Arc<AppState<M>>>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, UploadError>
where
  M: Model<Input = RgbImage, Output = DetectResult> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let Ok(mut multipart) = multipart else {
    return Err(UploadError::MissingFile);
  };

  let (filename, bytes) = read_file_field(&mut multipart).await?;
  if !allowed_file(&filename) {
    info!("拒绝上传文件: {}", filename);
    return Err(UploadError::InvalidFormat);
  }
  let filename = sanitize_filename(&filename).ok_or(UploadError::InvalidFormat)?;

  let jpeg = tokio::task::spawn_blocking(move || process_upload(&*state, &filename, &bytes))
    .await
    .map_err(|e| UploadError::Internal(e.to_string()))??;

  Ok(([(header::CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

/// 超出大小上限的错误原样返回，其余的读取错误按缺少文件处理
fn multipart_error(err: MultipartError) -> UploadError {
  if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
    return UploadError::Multipart(err);
  }
  info!("上传数据不完整: {}", err);
  UploadError::MissingFile
}

/// 找到 `file` 字段并读出全部内容
async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Bytes), UploadError> {
  while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
    if field.name() != Some(FILE_FIELD) {
      continue;
    }

    let filename = field.file_name().unwrap_or_default().to_string();
    if filename.is_empty() {
      return Err(UploadError::MissingFile);
    }

    let bytes = field.bytes().await.map_err(multipart_error)?;
    return Ok((filename, bytes));
  }

  Err(UploadError::MissingFile)
}

/// 暂存、解码、推理、绘制、保存，返回 JPEG 编码的结果
fn process_upload<M>(state: &AppState<M>, filename: &str, bytes: &[u8]) -> Result<Vec<u8>, UploadError>
where
  M: Model<Input = RgbImage, Output = DetectResult>,
  M::Error: std::error::Error + 'static,
{
  let staged = StagedUpload::write(&state.config.upload_dir, filename, bytes)
    .map_err(|e| UploadError::Internal(e.to_string()))?;

  let image = staged.decode().map_err(|e| {
    warn!("无法解码上传图像 {}: {}", staged.path().display(), e);
    UploadError::CouldNotLoad
  })?;
  info!(
    "收到图像 {}: {}x{}",
    staged.filename(),
    image.width(),
    image.height()
  );

  let output = SaveImageFileOutput::new(state.config.processed_path(filename), state.draw.clone());
  let (annotated, _) = OneShotTask
    .run_task(image, &state.model, &output)
    .map_err(|e| UploadError::Internal(e.to_string()))?;

  encode_jpeg(&annotated).map_err(|e| UploadError::Internal(e.to_string()))
}
