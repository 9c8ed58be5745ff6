// 该文件是 Xingren （行人计数） 项目的一部分。
// src/input/still_image.rs - 静态图像输入，按摄像头节奏重复输出同一帧
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

use std::time::{Duration, Instant};

use image::{DynamicImage, ImageReader, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use super::{BUFFER_WAIT_TIMEOUT, DEFAULT_BUFFER_COUNT, FrameSource};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameError, FramePool, PixelFormat, RawFrame, convert_rgb888},
  query_param,
};

#[derive(Error, Debug)]
pub enum StillImageSourceError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
  #[error("帧错误: {0}")]
  FrameError(#[from] FrameError),
  #[error("等待空闲帧缓冲超时")]
  BufferTimeout,
}

/// 把一张图片当作摄像头：解码一次，缩放并转换成目标像素格式，
/// 之后每次采集都把同一份像素复制进池化缓冲区。
pub struct StillImageSource {
  pixels: Vec<u8>,
  pool: FramePool,
  interval: Option<Duration>,
  next_due: Option<Instant>,
  remaining: Option<u64>,
}

impl FromUrlWithScheme for StillImageSource {
  const SCHEME: &'static str = "image";
}

impl FromUrl for StillImageSource {
  type Error = StillImageSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(StillImageSourceError::SchemeMismatch);
    }

    let image = ImageReader::open(url.path())?
      .with_guessed_format()?
      .decode()?;

    let width = param(url, "width")?.unwrap_or(image.width());
    let height = param(url, "height")?.unwrap_or(image.height());
    let format = param(url, "format")?.unwrap_or(PixelFormat::Rgb565);
    let buffers = param(url, "buffers")?.unwrap_or(DEFAULT_BUFFER_COUNT);
    let fps: Option<f64> = param(url, "fps")?;
    let frames = param(url, "frames")?;

    if width == 0 || height == 0 {
      return Err(StillImageSourceError::InvalidParameter(
        "width/height",
        format!("{}x{}", width, height),
      ));
    }
    let interval = match fps {
      Some(fps) if fps > 0.0 && fps.is_finite() => Some(Duration::from_secs_f64(1.0 / fps)),
      Some(fps) => {
        return Err(StillImageSourceError::InvalidParameter(
          "fps",
          fps.to_string(),
        ));
      }
      None => None,
    };

    info!(
      "加载图像 {}，输出 {}x{} {}",
      url.path(),
      width,
      height,
      format
    );
    Ok(Self::new(image, width, height, format, buffers, interval, frames))
  }
}

fn param<T: std::str::FromStr>(
  url: &Url,
  key: &'static str,
) -> Result<Option<T>, StillImageSourceError> {
  query_param(url, key).map_err(|raw| StillImageSourceError::InvalidParameter(key, raw))
}

impl StillImageSource {
  pub fn new(
    image: DynamicImage,
    width: u32,
    height: u32,
    format: PixelFormat,
    buffers: usize,
    interval: Option<Duration>,
    frames: Option<u64>,
  ) -> Self {
    let image = if image.width() == width && image.height() == height {
      image
    } else {
      image.resize_exact(width, height, FilterType::Triangle)
    };
    let pixels = convert_rgb888(image.to_rgb8().as_raw(), format);

    Self {
      pixels,
      pool: FramePool::new(buffers, width, height, format),
      interval,
      next_due: None,
      remaining: frames,
    }
  }

  /// 空闲缓冲区数量
  pub fn available_buffers(&self) -> usize {
    self.pool.available()
  }

  fn pace(&mut self) {
    let Some(interval) = self.interval else {
      return;
    };
    let now = Instant::now();
    if let Some(due) = self.next_due
      && due > now
    {
      std::thread::sleep(due - now);
    }
    let base = self.next_due.map_or(now, |due| due.max(now));
    self.next_due = Some(base + interval);
  }
}

impl FrameSource for StillImageSource {
  type Error = StillImageSourceError;

  fn acquire(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    if self.remaining == Some(0) {
      return Ok(None);
    }

    let mut frame = self
      .pool
      .acquire(BUFFER_WAIT_TIMEOUT)
      .ok_or(StillImageSourceError::BufferTimeout)?;
    self.pace();
    frame.fill_from(&self.pixels)?;

    if let Some(remaining) = self.remaining.as_mut() {
      *remaining -= 1;
    }
    debug!("采集帧 {}", frame.index());
    Ok(Some(frame))
  }

  fn width(&self) -> u32 {
    self.pool.width()
  }

  fn height(&self) -> u32 {
    self.pool.height()
  }

  fn format(&self) -> PixelFormat {
    self.pool.format()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn red_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 0, 0])))
  }

  #[test]
  fn frames_are_resized_and_converted() {
    let mut source = StillImageSource::new(
      red_image(32, 24),
      16,
      12,
      PixelFormat::Rgb565,
      2,
      None,
      None,
    );
    let frame = source.acquire().unwrap().unwrap();
    assert_eq!((frame.width(), frame.height()), (16, 12));
    assert_eq!(frame.pixels().len(), 16 * 12 * 2);
    assert_eq!(&frame.pixels()[..2], &[0xF8, 0x00]);
  }

  #[test]
  fn frame_limit_ends_the_source() {
    let mut source = StillImageSource::new(
      red_image(4, 4),
      4,
      4,
      PixelFormat::Grayscale,
      1,
      None,
      Some(2),
    );
    assert!(source.acquire().unwrap().is_some());
    assert!(source.acquire().unwrap().is_some());
    assert!(source.acquire().unwrap().is_none());
  }

  #[test]
  fn held_buffers_block_acquisition_until_released() {
    let mut source = StillImageSource::new(
      red_image(4, 4),
      4,
      4,
      PixelFormat::Rgb888,
      1,
      None,
      None,
    );
    let held = source.acquire().unwrap().unwrap();
    assert_eq!(source.available_buffers(), 0);
    drop(held);
    assert_eq!(source.available_buffers(), 1);
    assert!(source.acquire().unwrap().is_some());
  }

  #[test]
  fn loads_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.png");
    red_image(8, 8).save(&path).unwrap();

    let url = Url::parse(&format!(
      "image://{}?width=8&height=8&format=gray&frames=1",
      path.display()
    ))
    .unwrap();
    let mut source = StillImageSource::from_url(&url).unwrap();
    assert_eq!(source.format(), PixelFormat::Grayscale);
    let frame = source.acquire().unwrap().unwrap();
    assert_eq!(frame.pixels(), &[76u8; 64][..]);
    drop(frame);
    assert!(source.acquire().unwrap().is_none());
  }

  #[test]
  fn rejects_bad_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.png");
    red_image(8, 8).save(&path).unwrap();

    let url = Url::parse(&format!("image://{}?format=yuv", path.display())).unwrap();
    assert!(matches!(
      StillImageSource::from_url(&url),
      Err(StillImageSourceError::InvalidParameter("format", _))
    ));
  }
}
