// 该文件是 Xingren （行人计数） 项目的一部分。
// src/model.rs - 检测模型接口
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, tracker::Centroid};

/// 行人检测器。模型本身对流水线不透明：输入像素，输出带分数的检测框。
pub trait Detector: Send {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&mut self, pixels: &[u8], width: u32, height: u32)
  -> Result<Vec<Detection>, Self::Error>;
}

/// 单帧检测结果，只在一次跟踪周期内有效
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub score: f32,
  /// [x1, y1, x2, y2]，当前帧的像素坐标
  #[serde(rename = "box")]
  pub bbox: [i32; 4],
}

impl Detection {
  pub fn centroid(&self) -> Centroid {
    Centroid::of_box(&self.bbox)
  }
}

/// 丢弃分数低于阈值的检测结果（阈值本身保留）
pub fn filter_by_score(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
  detections
    .into_iter()
    .filter(|d| d.score >= threshold)
    .collect()
}

mod replay;
pub use self::replay::{ReplayDetector, ReplayDetectorError};

/// 不产生任何检测结果，用于纯推流
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDetector;

#[derive(Error, Debug)]
#[error("空检测器不会失败")]
pub struct NullDetectorError;

impl FromUrlWithScheme for NullDetector {
  const SCHEME: &'static str = "none";
}

impl FromUrl for NullDetector {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::SchemeMismatch);
    }
    Ok(NullDetector)
  }
}

impl Detector for NullDetector {
  type Error = NullDetectorError;

  fn infer(
    &mut self,
    _pixels: &[u8],
    _width: u32,
    _height: u32,
  ) -> Result<Vec<Detection>, Self::Error> {
    Ok(Vec::new())
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("回放检测器错误: {0}")]
  ReplayDetectorError(#[from] ReplayDetectorError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum DetectorWrapper {
  Replay(ReplayDetector),
  Null(NullDetector),
}

impl FromUrl for DetectorWrapper {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayDetector::SCHEME => Ok(DetectorWrapper::Replay(ReplayDetector::from_url(url)?)),
      NullDetector::SCHEME => Ok(DetectorWrapper::Null(NullDetector::from_url(url)?)),
      _ => Err(DetectorError::SchemeMismatch),
    }
  }
}

impl Detector for DetectorWrapper {
  type Error = DetectorError;

  fn infer(
    &mut self,
    pixels: &[u8],
    width: u32,
    height: u32,
  ) -> Result<Vec<Detection>, Self::Error> {
    match self {
      DetectorWrapper::Replay(detector) => detector
        .infer(pixels, width, height)
        .map_err(DetectorError::from),
      DetectorWrapper::Null(detector) => Ok(
        detector
          .infer(pixels, width, height)
          .unwrap_or_default(),
      ),
    }
  }
}
