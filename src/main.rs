// 该文件是 Xingren （行人计数） 项目的一部分。
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

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::Duration,
};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use xingren::{
  FromUrl,
  input::InputWrapper,
  model::DetectorWrapper,
  server::StreamServer,
  task::{PipelineTask, Task, install_interrupt_handler},
  watchdog::Watchdog,
};

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  let config = args.pipeline_config()?;

  info!("输入来源: {}", args.input);
  info!("检测模型: {}", args.model);
  info!("监听地址: {}", args.listen);

  let source = InputWrapper::from_url(&args.input)?;
  let detector = DetectorWrapper::from_url(&args.model)?;

  let running = Arc::new(AtomicBool::new(true));
  install_interrupt_handler(running.clone())?;
  let watchdog = Watchdog::spawn(config.watchdog_timeout, running.clone())?;

  #[allow(unused_mut)]
  let mut task = PipelineTask::new(config.clone())
    .with_running(running.clone())
    .with_heartbeat(watchdog.heartbeat());

  #[cfg(feature = "report")]
  let reporter = match &args.report_endpoint {
    Some(endpoint) => {
      use xingren::report::{EVENT_CHANNEL_DEPTH, MovementReporter, ReportConfig};

      let report_config = ReportConfig::new(endpoint.clone(), args.api_key.clone())
        .with_interval(args.report_interval());
      let reporter = MovementReporter::http(&report_config)?;
      let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_CHANNEL_DEPTH);
      task = task.with_event_sink(events_tx);
      info!("进出记录上报到 {}", report_config.movements_url()?);
      Some(reporter.spawn(events_rx, running.clone())?)
    }
    None => None,
  };

  let pipeline = task.run_task(source, detector)?;
  let server = StreamServer::bind(args.listen, pipeline.frames(), running.clone())?.spawn()?;

  while running.load(Ordering::Relaxed) && !pipeline.is_finished() {
    thread::sleep(SUPERVISE_INTERVAL);
  }
  if pipeline.is_finished() {
    info!("流水线已结束");
  }

  let tripped = watchdog.stop();
  pipeline.shutdown();
  server.stop();
  pipeline.join();

  #[cfg(feature = "report")]
  if let Some(reporter) = reporter
    && reporter.join().is_err()
  {
    error!("上报线程异常退出");
  }

  if tripped {
    error!("看门狗触发，以错误状态退出");
    std::process::exit(1);
  }

  info!("退出");
  Ok(())
}
