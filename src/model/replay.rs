// 该文件是 Xingren （行人计数） 项目的一部分。
// src/model/replay.rs - 回放检测结果
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

//! 从 JSON Lines 文件回放检测结果，每行对应一帧：
//!
//! ```text
//! [{"score": 0.91, "box": [40, 50, 60, 90]}]
//! []
//! ```
//!
//! URL 形如 `replay:///path/to/detections.jsonl?loop=false`，默认循环回放。

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detection, Detector},
  query_param,
};

#[derive(Error, Debug)]
pub enum ReplayDetectorError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("第 {line} 行解析失败: {source}")]
  ParseError {
    line: usize,
    source: serde_json::Error,
  },
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
}

pub struct ReplayDetector {
  frames: Vec<Vec<Detection>>,
  cursor: usize,
  looping: bool,
}

impl FromUrlWithScheme for ReplayDetector {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayDetector {
  type Error = ReplayDetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayDetectorError::SchemeMismatch);
    }

    let looping = query_param::<bool>(url, "loop")
      .map_err(|v| ReplayDetectorError::InvalidParameter("loop", v))?
      .unwrap_or(true);

    info!("加载检测回放文件: {}", url.path());
    let content = std::fs::read_to_string(url.path())?;
    let detector = Self::parse(&content)?.looping(looping);
    info!("回放帧数: {}", detector.frames.len());
    Ok(detector)
  }
}

impl ReplayDetector {
  pub fn new(frames: Vec<Vec<Detection>>) -> Self {
    Self {
      frames,
      cursor: 0,
      looping: true,
    }
  }

  pub fn looping(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }

  /// 空行跳过
  pub fn parse(content: &str) -> Result<Self, ReplayDetectorError> {
    let mut frames = Vec::new();
    for (index, line) in content.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      let detections: Vec<Detection> =
        serde_json::from_str(line).map_err(|source| ReplayDetectorError::ParseError {
          line: index + 1,
          source,
        })?;
      frames.push(detections);
    }
    Ok(Self::new(frames))
  }
}

impl Detector for ReplayDetector {
  type Error = ReplayDetectorError;

  fn infer(
    &mut self,
    _pixels: &[u8],
    _width: u32,
    _height: u32,
  ) -> Result<Vec<Detection>, Self::Error> {
    if self.cursor >= self.frames.len() {
      if !self.looping || self.frames.is_empty() {
        return Ok(Vec::new());
      }
      debug!("回放结束，从头开始");
      self.cursor = 0;
    }
    let detections = self.frames[self.cursor].clone();
    self.cursor += 1;
    Ok(detections)
  }
}
