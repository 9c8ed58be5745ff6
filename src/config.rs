// 该文件是 Xingren （行人计数） 项目的一部分。
// src/config.rs - 流水线可调参数
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

use std::time::Duration;

use thiserror::Error;

/// 检测线所在行
pub const DEFAULT_LINE_Y: i32 = 60;
/// 同一行人的质心匹配窗口
pub const DEFAULT_WINDOW_X: i32 = 10;
pub const DEFAULT_WINDOW_Y: i32 = 15;
/// 检测置信度阈值（含边界）
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.75;
pub const DEFAULT_CAPTURE_QUEUE_DEPTH: usize = 5;
pub const DEFAULT_OUTPUT_QUEUE_DEPTH: usize = 1;
/// JPEG 质量，0-63，数值越小画质越好
pub const DEFAULT_JPEG_QUALITY: u8 = 20;
pub const MAX_JPEG_QUALITY: u8 = 63;
pub const DEFAULT_CAPTURE_RETRY_DELAY: Duration = Duration::from_millis(10);
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("队列深度必须大于 0: {0}")]
  ZeroQueueDepth(&'static str),
  #[error("JPEG 质量超出范围 (0-{MAX_JPEG_QUALITY}): {0}")]
  QualityOutOfRange(u8),
  #[error("置信度阈值超出范围 (0.0-1.0): {0}")]
  ThresholdOutOfRange(f32),
  #[error("匹配窗口不能为负: ({0}, {1})")]
  NegativeWindow(i32, i32),
  #[error("看门狗超时不能为 0")]
  ZeroWatchdogTimeout,
}

/// 流水线的全部外部可调参数
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  pub line_y: i32,
  pub window_x: i32,
  pub window_y: i32,
  pub score_threshold: f32,
  pub capture_queue_depth: usize,
  pub output_queue_depth: usize,
  pub jpeg_quality: u8,
  pub capture_retry_delay: Duration,
  pub watchdog_timeout: Duration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      line_y: DEFAULT_LINE_Y,
      window_x: DEFAULT_WINDOW_X,
      window_y: DEFAULT_WINDOW_Y,
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      capture_queue_depth: DEFAULT_CAPTURE_QUEUE_DEPTH,
      output_queue_depth: DEFAULT_OUTPUT_QUEUE_DEPTH,
      jpeg_quality: DEFAULT_JPEG_QUALITY,
      capture_retry_delay: DEFAULT_CAPTURE_RETRY_DELAY,
      watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
    }
  }
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.capture_queue_depth == 0 {
      return Err(ConfigError::ZeroQueueDepth("capture"));
    }
    if self.output_queue_depth == 0 {
      return Err(ConfigError::ZeroQueueDepth("output"));
    }
    if self.jpeg_quality > MAX_JPEG_QUALITY {
      return Err(ConfigError::QualityOutOfRange(self.jpeg_quality));
    }
    if !(0.0..=1.0).contains(&self.score_threshold) {
      return Err(ConfigError::ThresholdOutOfRange(self.score_threshold));
    }
    if self.window_x < 0 || self.window_y < 0 {
      return Err(ConfigError::NegativeWindow(self.window_x, self.window_y));
    }
    if self.watchdog_timeout.is_zero() {
      return Err(ConfigError::ZeroWatchdogTimeout);
    }
    Ok(())
  }
}
