// 该文件是 Xingren （行人计数） 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入
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

use std::pin::Pin;

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::{BUFFER_WAIT_TIMEOUT, DEFAULT_BUFFER_COUNT, DEFAULT_HEIGHT, DEFAULT_WIDTH, FrameSource};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FramePool, PixelFormat, RawFrame},
  query_param,
};

/// 驱动侧 mmap 缓冲数量
const DRIVER_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4l2SourceError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("V4L2 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("参数 {0} 无效: {1}")]
  InvalidParameter(&'static str, String),
  #[error("设备不支持 YUYV 输出，实际格式 {0}")]
  UnsupportedFourCC(String),
  #[error("捕获流未初始化")]
  StreamClosed,
  #[error("等待空闲帧缓冲超时")]
  BufferTimeout,
}

/// V4L2 摄像头，按 YUYV 采集并逐帧转换为目标像素格式。
///
/// `Stream` 需要借用 `Device`，因此 `Device` 固定在堆上，
/// `Stream` 的生命周期被延长为 `'static` 并保证先于 `Device` 析构。
pub struct V4l2Source {
  device: Pin<Box<Device>>,
  stream: Option<Stream<'static>>,
  pool: FramePool,
  capture_width: u32,
  capture_height: u32,
}

impl FromUrlWithScheme for V4l2Source {
  const SCHEME: &'static str = "v4l2";
}

impl FromUrl for V4l2Source {
  type Error = V4l2SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4l2SourceError::SchemeMismatch);
    }

    let path = if url.path().is_empty() || url.path() == "/" {
      "/dev/video0"
    } else {
      url.path()
    };
    let width = param(url, "width")?.unwrap_or(DEFAULT_WIDTH);
    let height = param(url, "height")?.unwrap_or(DEFAULT_HEIGHT);
    let format = param(url, "format")?.unwrap_or(PixelFormat::Rgb565);
    let buffers = param(url, "buffers")?.unwrap_or(DEFAULT_BUFFER_COUNT);

    Self::open(path, width, height, format, buffers)
  }
}

fn param<T: std::str::FromStr>(url: &Url, key: &'static str) -> Result<Option<T>, V4l2SourceError> {
  query_param(url, key).map_err(|raw| V4l2SourceError::InvalidParameter(key, raw))
}

impl V4l2Source {
  pub fn open(
    path: &str,
    width: u32,
    height: u32,
    format: PixelFormat,
    buffers: usize,
  ) -> Result<Self, V4l2SourceError> {
    let device = Box::pin(Device::with_path(path)?);

    let mut requested = device.format()?;
    requested.width = width;
    requested.height = height;
    requested.fourcc = FourCC::new(b"YUYV");
    let actual = device.set_format(&requested)?;
    if actual.fourcc != FourCC::new(b"YUYV") {
      return Err(V4l2SourceError::UnsupportedFourCC(actual.fourcc.to_string()));
    }
    if actual.width != width || actual.height != height {
      warn!(
        "设备不支持 {}x{}，实际 {}x{}，将按比例取样",
        width, height, actual.width, actual.height
      );
    }

    let mut source = Self {
      device,
      stream: None,
      pool: FramePool::new(buffers, width, height, format),
      capture_width: actual.width,
      capture_height: actual.height,
    };

    // SAFETY: device 被 Pin<Box> 固定在堆上不会移动；
    // stream 在 Drop 中先于 device 释放
    let device_ref: &Device = &source.device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, DRIVER_BUFFERS)?
    };
    source.stream = Some(stream);

    info!(
      "打开摄像头 {}，采集 {}x{}，输出 {}x{} {}",
      path, actual.width, actual.height, width, height, format
    );
    Ok(source)
  }
}

/// YUYV 转 RGB，BT.601 全范围
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
  let y = y as f32;
  let u = u as f32 - 128.0;
  let v = v as f32 - 128.0;
  [
    (y + 1.402 * v).clamp(0.0, 255.0) as u8,
    (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8,
    (y + 1.772 * u).clamp(0.0, 255.0) as u8,
  ]
}

/// 从 YUYV 缓冲区最近邻取样写入目标帧
fn convert_yuyv(
  yuyv: &[u8],
  src_width: u32,
  src_height: u32,
  frame: &mut RawFrame,
) {
  let (dst_width, dst_height, format) = (frame.width(), frame.height(), frame.format());
  let bpp = format.bytes_per_pixel();
  let pixels = frame.pixels_mut();

  for dy in 0..dst_height {
    let sy = (dy as u64 * src_height as u64 / dst_height as u64) as usize;
    for dx in 0..dst_width {
      let sx = (dx as u64 * src_width as u64 / dst_width as u64) as usize;
      // 每 4 字节描述两个像素：Y0 U Y1 V
      let pair = (sy * src_width as usize + (sx & !1)) * 2;
      let Some(chunk) = yuyv.get(pair..pair + 4) else {
        continue;
      };
      let y = if sx & 1 == 0 { chunk[0] } else { chunk[2] };
      let packed = format.pack(yuv_to_rgb(y, chunk[1], chunk[3]));
      let offset = (dy as usize * dst_width as usize + dx as usize) * bpp;
      pixels[offset..offset + bpp].copy_from_slice(packed.as_slice());
    }
  }
}

impl FrameSource for V4l2Source {
  type Error = V4l2SourceError;

  fn acquire(&mut self) -> Result<Option<RawFrame>, Self::Error> {
    let mut frame = self
      .pool
      .acquire(BUFFER_WAIT_TIMEOUT)
      .ok_or(V4l2SourceError::BufferTimeout)?;
    let stream = self.stream.as_mut().ok_or(V4l2SourceError::StreamClosed)?;
    let (buffer, _meta) = stream.next()?;
    convert_yuyv(buffer, self.capture_width, self.capture_height, &mut frame);
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

impl Drop for V4l2Source {
  fn drop(&mut self) {
    // stream 必须先于 device 释放
    self.stream.take();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yuyv_conversion_samples_pixels() {
    // 4x1 YUYV：白 白 黑 黑
    let yuyv = [255, 128, 255, 128, 0, 128, 0, 128];
    let mut pool = FramePool::new(1, 2, 1, PixelFormat::Rgb888);
    let mut frame = pool.acquire(BUFFER_WAIT_TIMEOUT).unwrap();
    convert_yuyv(&yuyv, 4, 1, &mut frame);
    assert_eq!(frame.pixels(), &[255, 255, 255, 0, 0, 0]);
  }
}
