// 该文件是 Xingren （行人计数） 项目的一部分。
// src/output/jpeg.rs - JPEG 编码
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

use std::borrow::Cow;

use image::{ExtendedColorType, ImageEncoder, codecs::jpeg};
use thiserror::Error;

use crate::{
  config::MAX_JPEG_QUALITY,
  frame::{EncodedFrame, PixelFormat, RawFrame, rgb565_to_rgb888},
};

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("图像编码错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("JPEG 质量超出范围 (0-{MAX_JPEG_QUALITY}): {0}")]
  QualityOutOfRange(u8),
  #[error("像素数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  SizeMismatch { expected: usize, actual: usize },
  #[error("编码结果为空")]
  EmptyOutput,
}

/// JPEG 编码器。
///
/// 质量沿用摄像头驱动的 0-63 刻度（越小越好），线性映射到编码器的 100-1。
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
  quality: u8,
}

impl JpegEncoder {
  pub fn new(quality: u8) -> Result<Self, EncodeError> {
    if quality > MAX_JPEG_QUALITY {
      return Err(EncodeError::QualityOutOfRange(quality));
    }
    Ok(Self { quality })
  }

  pub fn quality(&self) -> u8 {
    self.quality
  }

  /// 映射后的编码器质量，1-100
  pub fn codec_quality(&self) -> u8 {
    (100 - u32::from(self.quality) * 99 / u32::from(MAX_JPEG_QUALITY)) as u8
  }

  pub fn encode_pixels(
    &self,
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
  ) -> Result<Vec<u8>, EncodeError> {
    let expected = format.frame_len(width, height);
    if pixels.len() != expected {
      return Err(EncodeError::SizeMismatch {
        expected,
        actual: pixels.len(),
      });
    }

    let (data, color): (Cow<'_, [u8]>, ExtendedColorType) = match format {
      PixelFormat::Rgb565 => (Cow::Owned(rgb565_to_rgb888(pixels)), ExtendedColorType::Rgb8),
      PixelFormat::Rgb888 => (Cow::Borrowed(pixels), ExtendedColorType::Rgb8),
      PixelFormat::Grayscale => (Cow::Borrowed(pixels), ExtendedColorType::L8),
    };

    let mut out = Vec::with_capacity(expected / 4);
    jpeg::JpegEncoder::new_with_quality(&mut out, self.codec_quality())
      .write_image(&data, width, height, color)?;
    if out.is_empty() {
      return Err(EncodeError::EmptyOutput);
    }
    Ok(out)
  }

  /// 编码当前帧内容，不消耗原始帧
  pub fn encode_frame(&self, frame: &RawFrame) -> Result<EncodedFrame, EncodeError> {
    let data = self.encode_pixels(frame.pixels(), frame.width(), frame.height(), frame.format())?;
    Ok(EncodedFrame::new(data, frame.index()))
  }
}

impl Default for JpegEncoder {
  fn default() -> Self {
    Self {
      quality: crate::config::DEFAULT_JPEG_QUALITY,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{FramePool, convert_rgb888};
  use image::{GenericImageView, ImageFormat};
  use std::time::Duration;

  #[test]
  fn quality_scale_is_inverted() {
    assert_eq!(JpegEncoder::new(0).unwrap().codec_quality(), 100);
    assert_eq!(JpegEncoder::new(63).unwrap().codec_quality(), 1);
    assert_eq!(JpegEncoder::new(20).unwrap().codec_quality(), 69);
    assert!(matches!(
      JpegEncoder::new(64),
      Err(EncodeError::QualityOutOfRange(64))
    ));
  }

  #[test]
  fn encodes_rgb565_frame_to_decodable_jpeg() {
    let mut pool = FramePool::new(1, 160, 120, PixelFormat::Rgb565);
    let mut frame = pool.acquire(Duration::from_millis(10)).unwrap();
    let rgb: Vec<u8> = (0..160 * 120).flat_map(|_| [0u8, 0, 255]).collect();
    frame
      .fill_from(&convert_rgb888(&rgb, PixelFormat::Rgb565))
      .unwrap();

    let encoded = JpegEncoder::default().encode_frame(&frame).unwrap();
    assert_eq!(encoded.index(), frame.index());
    assert_eq!(&encoded.as_bytes()[..2], &[0xFF, 0xD8]);

    let decoded = image::load_from_memory_with_format(encoded.as_bytes(), ImageFormat::Jpeg).unwrap();
    assert_eq!(decoded.dimensions(), (160, 120));
    let center = decoded.to_rgb8().get_pixel(80, 60).0;
    assert!(center[2] > 200 && center[0] < 50, "{:?}", center);
  }

  #[test]
  fn encodes_grayscale() {
    let encoded = JpegEncoder::new(10)
      .unwrap()
      .encode_pixels(&[128u8; 16 * 16], 16, 16, PixelFormat::Grayscale)
      .unwrap();
    let decoded = image::load_from_memory(&encoded).unwrap();
    assert_eq!(decoded.dimensions(), (16, 16));
  }

  #[test]
  fn rejects_mis_sized_buffers() {
    let result = JpegEncoder::default().encode_pixels(&[0u8; 10], 4, 4, PixelFormat::Rgb888);
    assert!(matches!(
      result,
      Err(EncodeError::SizeMismatch {
        expected: 48,
        actual: 10
      })
    ));
  }
}
