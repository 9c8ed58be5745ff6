// 该文件是 Xingren （行人计数） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use url::Url;

use xingren::config::{
  ConfigError, DEFAULT_CAPTURE_QUEUE_DEPTH, DEFAULT_JPEG_QUALITY, DEFAULT_LINE_Y,
  DEFAULT_OUTPUT_QUEUE_DEPTH, DEFAULT_SCORE_THRESHOLD, DEFAULT_WINDOW_X, DEFAULT_WINDOW_Y,
  PipelineConfig,
};

/// Xingren 行人计数与推流
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 帧来源，例如 image:///scene.png?width=160&height=120&fps=10 或 v4l2:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 检测器，例如 replay:///detections.jsonl；none:// 表示只推流
  #[arg(long, value_name = "MODEL", default_value = "none://")]
  pub model: Url,
  /// HTTP 监听地址
  #[arg(long, value_name = "ADDR", default_value = "0.0.0.0:80")]
  pub listen: SocketAddr,

  /// 检测线所在行
  #[arg(long, default_value_t = DEFAULT_LINE_Y, allow_negative_numbers = true)]
  pub line_y: i32,
  /// 质心匹配窗口（水平）
  #[arg(long, default_value_t = DEFAULT_WINDOW_X)]
  pub window_x: i32,
  /// 质心匹配窗口（垂直）
  #[arg(long, default_value_t = DEFAULT_WINDOW_Y)]
  pub window_y: i32,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_SCORE_THRESHOLD, value_name = "THRESHOLD")]
  pub score_threshold: f32,
  #[arg(long, default_value_t = DEFAULT_CAPTURE_QUEUE_DEPTH)]
  pub capture_queue_depth: usize,
  #[arg(long, default_value_t = DEFAULT_OUTPUT_QUEUE_DEPTH)]
  pub output_queue_depth: usize,
  /// JPEG 质量 (0 - 63，越小越好)
  #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY)]
  pub jpeg_quality: u8,
  /// 采集失败后的重试间隔（毫秒）
  #[arg(long, default_value_t = 10, value_name = "MS")]
  pub capture_retry_ms: u64,
  /// 推理线程无心跳多久后判定故障（毫秒）
  #[arg(long, default_value_t = 10_000, value_name = "MS")]
  pub watchdog_timeout_ms: u64,

  /// 看板服务地址，给出时启用进出记录上报
  #[cfg(feature = "report")]
  #[arg(long, value_name = "URL")]
  pub report_endpoint: Option<Url>,
  #[cfg(feature = "report")]
  #[arg(long, value_name = "KEY", default_value = "")]
  pub api_key: String,
  /// 上报周期（秒）
  #[cfg(feature = "report")]
  #[arg(long, default_value_t = 10, value_name = "SECS")]
  pub report_interval_secs: u64,
}

impl Args {
  pub fn pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
    let config = PipelineConfig {
      line_y: self.line_y,
      window_x: self.window_x,
      window_y: self.window_y,
      score_threshold: self.score_threshold,
      capture_queue_depth: self.capture_queue_depth,
      output_queue_depth: self.output_queue_depth,
      jpeg_quality: self.jpeg_quality,
      capture_retry_delay: Duration::from_millis(self.capture_retry_ms),
      watchdog_timeout: Duration::from_millis(self.watchdog_timeout_ms),
    };
    config.validate()?;
    Ok(config)
  }

  #[cfg(feature = "report")]
  pub fn report_interval(&self) -> Duration {
    Duration::from_secs(self.report_interval_secs.max(1))
  }
}
