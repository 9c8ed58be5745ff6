// 该文件是 Xingren （行人计数） 项目的一部分。
// src/bin/simple_count.rs - 不推流的简单计数程序
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

use std::sync::{Arc, atomic::AtomicBool};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use url::Url;

use xingren::{
  FromUrl,
  config::PipelineConfig,
  input::InputWrapper,
  model::DetectorWrapper,
  task::{CountTask, Task, install_interrupt_handler},
};

/// Xingren 简单计数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 检测器
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 帧来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 检测线所在行
  #[arg(long, value_name = "LINE_Y")]
  pub line_y: Option<i32>,

  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: u64,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("检测模型: {}", args.model);
  info!("输入来源: {}", args.input);

  let source = InputWrapper::from_url(&args.input)?;
  let detector = DetectorWrapper::from_url(&args.model)?;

  let mut config = PipelineConfig::default();
  if let Some(line_y) = args.line_y {
    config.line_y = line_y;
  }

  let running = Arc::new(AtomicBool::new(true));
  install_interrupt_handler(running.clone())?;

  let summary = CountTask::new(config)
    .with_frame_limit((args.frame_number > 0).then_some(args.frame_number))
    .with_running(running)
    .run_task(source, detector)?;

  println!(
    "frames={} entered={} exited={}",
    summary.frames, summary.entered, summary.exited
  );
  Ok(())
}
