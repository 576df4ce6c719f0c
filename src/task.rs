// 该文件是 Kanren （看人） 项目的一部分。
// src/task.rs - 推理与渲染任务
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

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  model::{DetectResult, Model},
  output::Render,
};

pub trait Task<F, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, frame: F, model: &M, output: &O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum TaskError<ME, RE>
where
  ME: std::error::Error + 'static,
  RE: std::error::Error + 'static,
{
  #[error("推理失败: {0}")]
  Infer(#[source] ME),
  #[error("渲染失败: {0}")]
  Render(#[source] RE),
}

/// 单张图像：推理一次，渲染一次
pub struct OneShotTask;

impl<F, ME, RE, M, O> Task<F, M, O> for OneShotTask
where
  ME: std::error::Error + 'static,
  RE: std::error::Error + 'static,
  M: Model<Input = F, Output = DetectResult, Error = ME>,
  O: Render<F, DetectResult, Error = RE>,
{
  type Output = (F, DetectResult);
  type Error = TaskError<ME, RE>;

  fn run_task(self, frame: F, model: &M, output: &O) -> Result<Self::Output, Self::Error> {
    let now = std::time::Instant::now();
    let result = model.infer(&frame).map_err(TaskError::Infer)?;
    let elapsed = now.elapsed();
    info!("推理完成，检测到 {} 个对象，耗时: {:.2?}", result.len(), elapsed);
    for item in result.iter() {
      debug!(
        "  - {}: {:.2} at ({:.0}, {:.0}, {:.0}, {:.0})",
        item.label, item.score, item.bbox[0], item.bbox[1], item.bbox[2], item.bbox[3]
      );
    }

    let rendered = output.render_result(&frame, &result).map_err(TaskError::Render)?;
    info!("渲染完成，耗时: {:.2?}", now.elapsed());

    Ok((rendered, result))
  }
}
