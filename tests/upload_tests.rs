// 该文件是 Kanren （看人） 项目的一部分。
// tests/upload_tests.rs - 上传接口测试
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

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use axum::{
  Router,
  body::{Body, to_bytes},
  http::{Method, Request, StatusCode, header},
  response::Response,
};
use image::{ImageFormat, Rgb, RgbImage};
use kanren::{
  config::AppConfig,
  model::{DetectItem, DetectResult, Model},
  output::draw::Draw,
  server::{AppState, create_app},
};
use tempfile::TempDir;
use thiserror::Error;
use tower::util::ServiceExt; // for `oneshot`

const BOUNDARY: &str = "kanren-test-boundary";

#[derive(Error, Debug)]
#[error("inference exploded")]
struct FakeError;

/// 总是返回同一组检测结果的模型
struct FixedModel {
  items: Vec<DetectItem>,
  fail: bool,
}

impl Model for FixedModel {
  type Input = RgbImage;
  type Output = DetectResult;
  type Error = FakeError;

  fn infer(&self, _input: &RgbImage) -> Result<DetectResult, FakeError> {
    if self.fail {
      return Err(FakeError);
    }
    Ok(DetectResult::from(self.items.clone()))
  }
}

fn person_at(bbox: [f32; 4], score: f32) -> DetectItem {
  DetectItem {
    label: "person".to_string(),
    score,
    bbox,
  }
}

/// Helper: 在临时目录中创建服务
fn setup_app(model: FixedModel) -> (Router, TempDir, AppConfig) {
  setup_app_with_limit(model, 32 * 1024 * 1024)
}

fn setup_app_with_limit(model: FixedModel, max_upload_bytes: usize) -> (Router, TempDir, AppConfig) {
  let dir = tempfile::tempdir().unwrap();
  let mut config = AppConfig::new(dir.path().join("uploads"), dir.path().join("processed"));
  config.max_upload_bytes = max_upload_bytes;
  config.ensure_dirs().unwrap();
  let draw = Draw::with_embedded_font(config.colors.clone()).unwrap();
  let state = AppState::new(config.clone(), model, draw);
  (create_app(Arc::new(state)), dir, config)
}

fn one_person_app() -> (Router, TempDir, AppConfig) {
  setup_app(FixedModel {
    items: vec![person_at([10.0, 10.0, 100.0, 200.0], 0.85)],
    fail: false,
  })
}

fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
  let mut buf = Vec::new();
  RgbImage::from_pixel(width, height, Rgb([200, 200, 200]))
    .write_to(&mut Cursor::new(&mut buf), format)
    .unwrap();
  buf
}

fn multipart_request(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
  let mut body = Vec::new();
  body.extend_from_slice(
    format!(
      "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .as_bytes(),
  );
  body.extend_from_slice(content);
  body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

  Request::builder()
    .method(Method::POST)
    .uri("/upload")
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(Body::from(body))
    .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
  to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap()
    .to_vec()
}

async fn body_text(response: Response) -> String {
  String::from_utf8(body_bytes(response).await).unwrap()
}

fn assert_redirects_to_form(response: &Response) {
  assert!(
    response.status().is_redirection(),
    "expected redirect, got {}",
    response.status()
  );
  assert_eq!(response.headers()[header::LOCATION], "/");
}

fn is_empty_dir(path: &Path) -> bool {
  std::fs::read_dir(path).unwrap().next().is_none()
}

#[tokio::test]
async fn test_form_is_served() {
  let (app, _dir, _) = one_person_app();
  let request = Request::builder().uri("/").body(Body::empty()).unwrap();
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let html = body_text(response).await;
  assert!(html.contains("<title>Image Upload Form</title>"));
  assert!(html.contains(r#"action="/upload""#));
  assert!(html.contains(r#"name="file""#));
}

#[tokio::test]
async fn test_valid_upload_returns_jpeg() {
  let (app, _dir, config) = one_person_app();
  let request = multipart_request("file", "photo.png", &encoded(160, 240, ImageFormat::Png));
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

  let body = body_bytes(response).await;
  let decoded = image::load_from_memory_with_format(&body, ImageFormat::Jpeg).unwrap();
  assert_eq!((decoded.width(), decoded.height()), (160, 240));

  // 暂存文件与结果文件都保留在磁盘上
  assert!(config.upload_dir.join("photo.png").exists());
  assert!(config.processed_dir.join("processed_photo.png").exists());
}

#[tokio::test]
async fn test_person_box_is_drawn_in_yellow() {
  let (app, _dir, config) = one_person_app();
  let request = multipart_request("file", "photo.png", &encoded(160, 240, ImageFormat::Png));
  let response = app.oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  let processed = image::open(config.processed_dir.join("processed_photo.png"))
    .unwrap()
    .to_rgb8();
  let yellow = Rgb([255, 255, 0]);
  for (x, y) in [(10, 10), (100, 10), (10, 200), (100, 200), (55, 200)] {
    assert_eq!(processed.get_pixel(x, y), &yellow, "({}, {})", x, y);
  }
  assert_eq!(processed.get_pixel(55, 100), &Rgb([200, 200, 200]));
}

#[tokio::test]
async fn test_person_label_is_drawn_above_box() {
  let (app, _dir, config) = setup_app(FixedModel {
    items: vec![person_at([10.0, 60.0, 150.0, 200.0], 0.85)],
    fail: false,
  });
  let request = multipart_request("file", "photo.png", &encoded(160, 240, ImageFormat::Png));
  let response = app.oneshot(request).await.unwrap();
  assert_eq!(response.status(), StatusCode::OK);

  let processed = image::open(config.processed_dir.join("processed_photo.png"))
    .unwrap()
    .to_rgb8();
  let background = Rgb([200, 200, 200]);
  let changed = |rows: std::ops::Range<u32>| {
    rows
      .flat_map(|y| (0..processed.width()).map(move |x| (x, y)))
      .filter(|&(x, y)| processed.get_pixel(x, y) != &background)
      .count()
  };

  // 标签基线在框顶上方 10 像素
  assert!(changed(36..56) > 20);
  assert_eq!(changed(0..34), 0);
  assert_eq!(changed(56..60), 0);
}

#[tokio::test]
async fn test_uppercase_jpg_is_accepted() {
  let (app, _dir, config) = one_person_app();
  let request = multipart_request("file", "PHOTO.JPG", &encoded(64, 64, ImageFormat::Jpeg));
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
  assert!(config.processed_dir.join("processed_PHOTO.JPG").exists());
}

#[tokio::test]
async fn test_gif_upload_answers_with_jpeg() {
  let (app, _dir, _) = setup_app(FixedModel {
    items: vec![],
    fail: false,
  });
  let request = multipart_request("file", "anim.gif", &encoded(32, 32, ImageFormat::Gif));
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let body = body_bytes(response).await;
  assert_eq!(image::guess_format(&body).unwrap(), ImageFormat::Jpeg);
}

#[tokio::test]
async fn test_disallowed_extension_is_rejected() {
  let (app, _dir, config) = one_person_app();
  let request = multipart_request("file", "doc.txt", b"hello");
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(body_text(response).await, "Invalid file format.");
  assert!(is_empty_dir(&config.upload_dir));
}

#[tokio::test]
async fn test_name_without_extension_is_rejected() {
  let (app, _dir, _) = one_person_app();
  let request = multipart_request("file", "photo", &encoded(8, 8, ImageFormat::Png));
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(body_text(response).await, "Invalid file format.");
}

#[tokio::test]
async fn test_corrupt_image_is_rejected() {
  let (app, _dir, config) = one_person_app();
  let request = multipart_request("file", "broken.jpg", b"definitely not a jpeg");
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(body_text(response).await, "Error: Could not load image.");
  // 失败的上传不会被清理，也不会产生结果文件
  assert!(config.upload_dir.join("broken.jpg").exists());
  assert!(is_empty_dir(&config.processed_dir));
}

#[tokio::test]
async fn test_missing_file_field_redirects() {
  let (app, _dir, _) = one_person_app();
  let request = multipart_request("other", "photo.png", &encoded(8, 8, ImageFormat::Png));
  let response = app.oneshot(request).await.unwrap();

  assert_redirects_to_form(&response);
}

#[tokio::test]
async fn test_empty_filename_redirects() {
  let (app, _dir, _) = one_person_app();
  let request = multipart_request("file", "", b"");
  let response = app.oneshot(request).await.unwrap();

  assert_redirects_to_form(&response);
}

#[tokio::test]
async fn test_non_multipart_body_redirects() {
  let (app, _dir, _) = one_person_app();
  let request = Request::builder()
    .method(Method::POST)
    .uri("/upload")
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from("{}"))
    .unwrap();
  let response = app.oneshot(request).await.unwrap();

  assert_redirects_to_form(&response);
}

#[tokio::test]
async fn test_truncated_multipart_body_redirects() {
  let (app, _dir, _) = one_person_app();
  let body = format!(
    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"photo.png\"\r\n\r\nhalf an image"
  );
  let request = Request::builder()
    .method(Method::POST)
    .uri("/upload")
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(Body::from(body))
    .unwrap();
  let response = app.oneshot(request).await.unwrap();

  assert_redirects_to_form(&response);
}

#[tokio::test]
async fn test_oversized_upload_is_rejected() {
  let (app, _dir, config) = setup_app_with_limit(
    FixedModel {
      items: vec![],
      fail: false,
    },
    1024,
  );
  let request = multipart_request("file", "big.png", &vec![0u8; 8 * 1024]);
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
  assert!(is_empty_dir(&config.upload_dir));
}

#[tokio::test]
async fn test_filename_cannot_escape_upload_dir() {
  let (app, dir, config) = one_person_app();
  let request = multipart_request("file", "../escape.png", &encoded(8, 8, ImageFormat::Png));
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  assert!(config.upload_dir.join("escape.png").exists());
  assert!(!dir.path().join("escape.png").exists());
}

#[tokio::test]
async fn test_same_image_twice_gives_same_result() {
  let (app, _dir, config) = one_person_app();
  let content = encoded(160, 240, ImageFormat::Png);
  let processed = config.processed_dir.join("processed_same.png");

  let response = app
    .clone()
    .oneshot(multipart_request("file", "same.png", &content))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let first = std::fs::read(&processed).unwrap();

  let response = app
    .oneshot(multipart_request("file", "same.png", &content))
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let second = std::fs::read(&processed).unwrap();

  assert_eq!(first, second);
}

#[tokio::test]
async fn test_inference_failure_is_server_error() {
  let (app, _dir, _) = setup_app(FixedModel {
    items: vec![],
    fail: true,
  });
  let request = multipart_request("file", "photo.png", &encoded(8, 8, ImageFormat::Png));
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_get_upload_is_not_allowed() {
  let (app, _dir, _) = one_person_app();
  let request = Request::builder()
    .method(Method::GET)
    .uri("/upload")
    .body(Body::empty())
    .unwrap();
  let response = app.oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
